//! Typed ID definitions for allocator-facing entities.
//!
//! Both ID kinds are assigned by the master: framework IDs at registration,
//! agent IDs at agent admission. The allocator treats them as opaque keys.

use crate::define_id;

define_id!(FrameworkId, "fw");
define_id!(AgentId, "agent");

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framework_id_minted_prefix() {
        let id = FrameworkId::new();
        assert!(id.value().starts_with("fw_"));
    }

    #[test]
    fn test_framework_id_roundtrip() {
        let id = FrameworkId::new();
        let parsed: FrameworkId = id.value().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_agent_id_accepts_external_values() {
        let parsed: AgentId = "20260801-143523-16842879-5050-12".parse().unwrap();
        assert_eq!(parsed.value(), "20260801-143523-16842879-5050-12");
    }

    #[test]
    fn test_agent_id_rejects_empty() {
        let result: Result<AgentId, _> = "".parse();
        assert!(matches!(result.unwrap_err(), crate::IdError::Empty));
    }

    #[test]
    fn test_agent_id_rejects_whitespace() {
        let result: Result<AgentId, _> = "agent 1".parse();
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::InvalidCharacters(_)
        ));
    }

    #[test]
    fn test_framework_id_json_roundtrip() {
        let id = FrameworkId::new();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: FrameworkId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_minted_ids_sortable() {
        let id1 = AgentId::new();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let id2 = AgentId::new();
        // ULIDs are time-ordered, so id1 < id2
        assert!(id1 < id2);
    }
}
