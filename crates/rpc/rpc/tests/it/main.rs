#![allow(missing_docs)]

mod chain;
mod trace;

const fn main() {}
