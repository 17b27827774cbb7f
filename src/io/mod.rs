mod endian;
mod file_reader;

pub use endian::{read_u16_be, read_u16_le, read_u32_be, read_u32_le, read_u64_be, read_u64_le};
pub use file_reader::{read_signature, LocalFileReader, RangeReader, SIGNATURE_LEN};
