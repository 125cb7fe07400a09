//! Client-side walk of a key chain returned by the server

use crate::keys::{unwrap_key, SecretKey};

/// Unwrap an item's key given the caller's user key, the chain of wrapped
/// folder keys ordered root-to-leaf, and the item's own wrapped key.
///
/// An empty chain means the item is wrapped directly under the user key.
pub fn unwrap_chain(
    user_key: &SecretKey,
    chain: &[Vec<u8>],
    item_wrapped: &[u8],
) -> anyhow::Result<SecretKey> {
    let mut current = user_key.clone();
    for (depth, wrapped) in chain.iter().enumerate() {
        current = unwrap_key(&current, wrapped)
            .map_err(|e| anyhow::anyhow!("chain link {depth}: {e}"))?;
    }
    unwrap_key(&current, item_wrapped).map_err(|e| anyhow::anyhow!("item key: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{generate_key, wrap_key};

    #[test]
    fn test_two_level_chain() {
        let user = generate_key();
        let f1 = generate_key();
        let f2 = generate_key();
        let item = generate_key();

        let chain = vec![wrap_key(&user, &f1).unwrap(), wrap_key(&f1, &f2).unwrap()];
        let leaf = wrap_key(&f2, &item).unwrap();

        let got = unwrap_chain(&user, &chain, &leaf).unwrap();
        assert_eq!(got.as_bytes(), item.as_bytes());
    }

    #[test]
    fn test_empty_chain_uses_user_key() {
        let user = generate_key();
        let item = generate_key();
        let leaf = wrap_key(&user, &item).unwrap();
        let got = unwrap_chain(&user, &[], &leaf).unwrap();
        assert_eq!(got.as_bytes(), item.as_bytes());
    }

    #[test]
    fn test_out_of_order_chain_fails() {
        let user = generate_key();
        let f1 = generate_key();
        let f2 = generate_key();
        let item = generate_key();

        let chain = vec![wrap_key(&f1, &f2).unwrap(), wrap_key(&user, &f1).unwrap()];
        let leaf = wrap_key(&f2, &item).unwrap();

        let err = unwrap_chain(&user, &chain, &leaf).unwrap_err();
        assert!(err.to_string().contains("chain link 0"));
    }
}
