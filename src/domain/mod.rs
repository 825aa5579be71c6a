pub mod entities;
pub mod money;
pub mod status;
pub mod views;

pub use entities::*;
pub use money::Money;
pub use status::*;
pub use views::*;

/// Treats an empty form or query value as absent, so `?status=` means "any".
pub fn empty_as_none<'de, D, T>(de: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let opt = <Option<String> as serde::Deserialize>::deserialize(de)?;
    match opt.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// Group name shared by both participants of a product conversation.
pub fn conversation_key(a: Id, b: Id, product_id: Id) -> String {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    format!("chat-{}-{}-p{}", low, high, product_id)
}

/// Inverse of [`conversation_key`]: `(low, high, product_id)`.
pub fn parse_conversation_key(key: &str) -> Option<(Id, Id, Id)> {
    let rest = key.strip_prefix("chat-")?;
    let mut parts = rest.splitn(3, '-');
    let low = parts.next()?.parse().ok()?;
    let high = parts.next()?.parse().ok()?;
    let product = parts.next()?.strip_prefix('p')?.parse().ok()?;
    Some((low, high, product))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_key_is_order_independent() {
        assert_eq!(conversation_key(7, 3, 12), "chat-3-7-p12");
        assert_eq!(conversation_key(3, 7, 12), conversation_key(7, 3, 12));
    }

    #[test]
    fn conversation_key_parses_back() {
        assert_eq!(parse_conversation_key("chat-3-7-p12"), Some((3, 7, 12)));
        assert_eq!(parse_conversation_key("chat-3-7-12"), None);
        assert_eq!(parse_conversation_key("admins"), None);
    }
}
