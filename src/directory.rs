//! Token/group directory: maps bearer tokens to group names.

use std::collections::HashSet;

use crate::config::Secrets;

/// Immutable token directory, rebuilt wholesale on `/reload`.
#[derive(Debug, Default)]
pub struct TokenDirectory {
    /// Group name -> tokens, in secrets-file order.
    groups: Vec<(String, Vec<String>)>,
    admin_groups: HashSet<String>,
}

impl TokenDirectory {
    pub fn from_secrets(secrets: &Secrets) -> Self {
        let mut groups = Vec::new();
        for entry in &secrets.groups {
            for (group, tokens) in entry {
                groups.push((group.clone(), tokens.clone()));
            }
        }
        Self {
            groups,
            admin_groups: secrets.admin_groups.iter().cloned().collect(),
        }
    }

    /// Linear scan over all groups; the first group containing the token
    /// wins. Cross-group token collisions are undefined by contract.
    pub fn group_for_token(&self, token: &str) -> Option<&str> {
        self.groups
            .iter()
            .find(|(_, tokens)| tokens.iter().any(|t| t == token))
            .map(|(group, _)| group.as_str())
    }

    pub fn is_admin(&self, group: &str) -> bool {
        self.admin_groups.contains(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> TokenDirectory {
        let secrets: Secrets = serde_yaml::from_str(
            r#"
groups:
  - research: [tok-a, shared]
  - interns: [tok-b, shared]
admin_groups: [research]
vllm_token: fleet-secret
"#,
        )
        .unwrap();
        TokenDirectory::from_secrets(&secrets)
    }

    #[test]
    fn test_group_for_token() {
        let dir = directory();
        assert_eq!(dir.group_for_token("tok-a"), Some("research"));
        assert_eq!(dir.group_for_token("tok-b"), Some("interns"));
        assert_eq!(dir.group_for_token("unknown"), None);
    }

    #[test]
    fn test_first_match_wins_on_collision() {
        let dir = directory();
        assert_eq!(dir.group_for_token("shared"), Some("research"));
    }

    #[test]
    fn test_is_admin() {
        let dir = directory();
        assert!(dir.is_admin("research"));
        assert!(!dir.is_admin("interns"));
        assert!(!dir.is_admin("nonexistent"));
    }
}
