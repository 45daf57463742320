//! Discovery stages: passive aggregation, wordlist brute force and permutation
//! expansion, each wrapping an external enumeration tool.

mod active;
mod passive;
mod permute;
mod tool;

pub use active::DnsxBrute;
pub use passive::Subfinder;
pub use permute::{generate as generate_permutations, Permutations, DEFAULT_TOKENS};
pub use tool::{per_seed, run_lines};
