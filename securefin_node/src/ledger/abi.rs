// src/ledger/abi.rs
// Minimal Solidity ABI encoding for contract calls taking string arguments

use tiny_keccak::{Hasher, Keccak};

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut k = Keccak::v256();
    k.update(data);
    let mut out = [0u8; 32];
    k.finalize(&mut out);
    out
}

/// First four bytes of keccak256 of the canonical signature, e.g. `transfer(address,uint256)`.
pub fn function_selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

fn word_from_usize(v: usize) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&(v as u64).to_be_bytes());
    word
}

fn padded_len(n: usize) -> usize {
    n.div_ceil(32) * 32
}

/// ABI-encode a tuple made only of `string` arguments.
///
/// Head holds one offset per argument (relative to the start of the argument
/// block), tail holds each string as a length word followed by its bytes
/// right-padded to a 32-byte boundary.
pub fn encode_strings(args: &[&str]) -> Vec<u8> {
    let head_len = 32 * args.len();
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for arg in args {
        head.extend_from_slice(&word_from_usize(head_len + tail.len()));
        let bytes = arg.as_bytes();
        tail.extend_from_slice(&word_from_usize(bytes.len()));
        tail.extend_from_slice(bytes);
        tail.resize(tail.len() + padded_len(bytes.len()) - bytes.len(), 0);
    }

    head.extend_from_slice(&tail);
    head
}

/// `0x`-prefixed calldata for a call whose parameters are all strings.
pub fn encode_call(signature: &str, args: &[&str]) -> String {
    let mut data = function_selector(signature).to_vec();
    data.extend_from_slice(&encode_strings(args));
    format!("0x{}", hex::encode(data))
}
