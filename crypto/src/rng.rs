//! CSPRNG access.

use crate::CryptoError;

/// Fill `buf` from the system CSPRNG.
pub fn fill(buf: &mut [u8]) -> Result<(), CryptoError> {
    getrandom::getrandom(buf).map_err(|e| CryptoError::Rng(e.to_string()))
}

/// `n` fresh random bytes.
pub fn random_bytes(n: usize) -> Result<Vec<u8>, CryptoError> {
    let mut buf = vec![0u8; n];
    fill(&mut buf)?;
    Ok(buf)
}

/// A fresh random array, for fixed-size salts, IVs, and challenges.
pub fn random_array<const N: usize>() -> Result<[u8; N], CryptoError> {
    let mut buf = [0u8; N];
    fill(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_bytes_len_and_variation() {
        let a = random_bytes(32).unwrap();
        let b = random_bytes(32).unwrap();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b, "two 32-byte draws should not collide");
    }

    #[test]
    fn test_random_array_sizes() {
        let _: [u8; 12] = random_array().unwrap();
        let _: [u8; 16] = random_array().unwrap();
        let _: [u8; 32] = random_array().unwrap();
    }
}
