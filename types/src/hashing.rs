use std::io::{Result as IoResult, Write};

use serde::Serialize;
use tiny_keccak::{Hasher as _, Keccak};

use crate::primitives::H256;

#[must_use]
pub fn keccak256(bytes: impl AsRef<[u8]>) -> H256 {
    let mut hasher = Keccak::v256();
    hasher.update(bytes.as_ref());
    finalize(hasher)
}

/// Hashes the `bincode` encoding of `value` without allocating a buffer for it.
#[must_use]
pub fn hash_serialized(value: &impl Serialize) -> H256 {
    let mut writer = KeccakWriter(Keccak::v256());

    bincode::serialize_into(&mut writer, value)
        .expect("serializing plain data into a hasher cannot fail");

    finalize(writer.0)
}

fn finalize(hasher: Keccak) -> H256 {
    let mut output = H256::zero();
    hasher.finalize(output.as_bytes_mut());
    output
}

struct KeccakWriter(Keccak);

impl Write for KeccakWriter {
    fn write(&mut self, buffer: &[u8]) -> IoResult<usize> {
        self.0.update(buffer);
        Ok(buffer.len())
    }

    fn flush(&mut self) -> IoResult<()> {
        Ok(())
    }
}
