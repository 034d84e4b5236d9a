//! Byte-level encodings shared by the on-disk formats.

pub mod varint;
