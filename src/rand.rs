//! The single place where we generate random material for our own use.

use crate::error::Error;

use ring::rand::{SecureRandom, SystemRandom};

/// Fill the whole slice with random material.
pub(crate) fn fill_random(bytes: &mut [u8]) -> Result<(), Error> {
    SystemRandom::new()
        .fill(bytes)
        .map_err(|_| Error::FailedToGetRandomBytes)
}

/// Make a Vec<u8> of the given size containing random material.
pub(crate) fn random_vec(len: usize) -> Result<Vec<u8>, Error> {
    let mut v = vec![0; len];
    fill_random(&mut v)?;
    Ok(v)
}

/// Return a uniformly random u32.
pub(crate) fn random_u32() -> Result<u32, Error> {
    let mut buf = [0u8; 4];
    fill_random(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}
