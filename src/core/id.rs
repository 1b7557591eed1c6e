use uuid::Uuid;

/// Generates a collision-resistant document id in canonical hyphenated form.
pub fn generate() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_canonical_36_chars() {
        let id = generate();
        assert_eq!(id.len(), 36);
        assert_eq!(id.matches('-').count(), 4);
    }

    #[test]
    fn consecutive_ids_are_distinct() {
        assert_ne!(generate(), generate());
    }
}
