use super::model::{Group, GroupId, WatchlistState, is_permutation};
use crate::core::{ServiceError, ServiceResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    #[serde(flatten)]
    pub group: Group,
    pub item_count: usize,
}

fn validate_name(name: &str) -> ServiceResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ServiceError::InvalidInput(
            "group name must not be empty".to_string(),
        ));
    }
    Ok(name.to_string())
}

impl WatchlistState {
    pub fn ordered_groups(&self) -> Vec<&Group> {
        let mut groups: Vec<&Group> = self.groups.iter().collect();
        groups.sort_by_key(|g| g.position);
        groups
    }

    fn group_index(&self, id: GroupId) -> ServiceResult<usize> {
        self.groups
            .iter()
            .position(|g| g.id == id)
            .ok_or_else(|| ServiceError::NotFound(format!("Group {id}")))
    }

    pub fn create_group(&mut self, name: &str, now: DateTime<Utc>) -> ServiceResult<Group> {
        let name = validate_name(name)?;
        let group = Group {
            id: self.next_group_id,
            name,
            position: self
                .groups
                .iter()
                .map(|g| g.position + 1)
                .max()
                .unwrap_or(0),
            created_at: now,
        };
        self.next_group_id += 1;
        self.groups.push(group.clone());
        Ok(group)
    }

    pub fn rename_group(&mut self, id: GroupId, name: &str) -> ServiceResult<Group> {
        let index = self.group_index(id)?;
        let name = validate_name(name)?;
        self.groups[index].name = name;
        Ok(self.groups[index].clone())
    }

    /// Drops the group and appends its members to the ungrouped partition in
    /// their existing order.
    pub fn delete_group(&mut self, id: GroupId) -> ServiceResult<Group> {
        let index = self.group_index(id)?;

        let mut next_position = self.next_position(None);
        let members: Vec<String> = self
            .partition(Some(id))
            .into_iter()
            .map(|item| item.fund_code.clone())
            .collect();
        for code in members {
            if let Some(item) = self.items.iter_mut().find(|item| item.fund_code == code) {
                item.group_id = None;
                item.position = next_position;
                next_position += 1;
            }
        }

        let removed = self.groups.remove(index);
        let mut ids: Vec<(u32, GroupId)> = self.groups.iter().map(|g| (g.position, g.id)).collect();
        ids.sort();
        for (position, (_, gid)) in (0u32..).zip(ids) {
            if let Some(group) = self.groups.iter_mut().find(|g| g.id == gid) {
                group.position = position;
            }
        }
        Ok(removed)
    }

    pub fn reorder_groups(&mut self, ids: &[GroupId]) -> ServiceResult<()> {
        let current: HashSet<GroupId> = self.groups.iter().map(|g| g.id).collect();
        if !is_permutation(ids, &current) {
            return Err(ServiceError::OrderMismatch(format!(
                "expected a permutation of the {} group ids, got {}",
                current.len(),
                ids.len()
            )));
        }
        for (position, id) in (0u32..).zip(ids) {
            if let Some(group) = self.groups.iter_mut().find(|g| g.id == *id) {
                group.position = position;
            }
        }
        Ok(())
    }

    pub fn group_summaries(&self) -> Vec<GroupSummary> {
        self.ordered_groups()
            .into_iter()
            .map(|group| GroupSummary {
                item_count: self
                    .items
                    .iter()
                    .filter(|item| item.group_id == Some(group.id))
                    .count(),
                group: group.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positions(state: &WatchlistState) -> Vec<(GroupId, u32)> {
        state.ordered_groups().iter().map(|g| (g.id, g.position)).collect()
    }

    #[test]
    fn test_create_generates_ids_and_positions() {
        let mut state = WatchlistState::default();
        let a = state.create_group("Core", Utc::now()).unwrap();
        let b = state.create_group("Core", Utc::now()).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!((a.position, b.position), (0, 1));
        assert!(matches!(
            state.create_group("  ", Utc::now()),
            Err(ServiceError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_ids_are_not_reused_after_delete() {
        let mut state = WatchlistState::default();
        let a = state.create_group("a", Utc::now()).unwrap();
        state.delete_group(a.id).unwrap();
        let b = state.create_group("b", Utc::now()).unwrap();
        assert!(b.id > a.id);
        assert_eq!(b.position, 0);
    }

    #[test]
    fn test_rename() {
        let mut state = WatchlistState::default();
        let group = state.create_group("old", Utc::now()).unwrap();
        assert_eq!(state.rename_group(group.id, "new").unwrap().name, "new");
        assert!(matches!(
            state.rename_group(99, "x"),
            Err(ServiceError::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_rehomes_members_in_order_and_keeps_positions_dense() {
        let mut state = WatchlistState::default();
        let first = state.create_group("first", Utc::now()).unwrap();
        let doomed = state.create_group("doomed", Utc::now()).unwrap();
        let last = state.create_group("last", Utc::now()).unwrap();
        state.add("U1", "U1", "", None, Utc::now()).unwrap();
        for code in ["A", "B", "C"] {
            state.add(code, code, "", Some(doomed.id), Utc::now()).unwrap();
        }
        state
            .reorder(
                &["B".to_string(), "C".to_string(), "A".to_string()],
                Some(doomed.id),
            )
            .unwrap();

        state.delete_group(doomed.id).unwrap();

        let ungrouped: Vec<(String, u32)> = state
            .partition(None)
            .iter()
            .map(|i| (i.fund_code.clone(), i.position))
            .collect();
        assert_eq!(
            ungrouped,
            vec![
                ("U1".to_string(), 0),
                ("B".to_string(), 1),
                ("C".to_string(), 2),
                ("A".to_string(), 3)
            ]
        );
        assert_eq!(positions(&state), vec![(first.id, 0), (last.id, 1)]);
        assert!(matches!(
            state.delete_group(doomed.id),
            Err(ServiceError::NotFound(_))
        ));
    }

    #[test]
    fn test_reorder_groups_validates_permutation() {
        let mut state = WatchlistState::default();
        let a = state.create_group("a", Utc::now()).unwrap();
        let b = state.create_group("b", Utc::now()).unwrap();
        let c = state.create_group("c", Utc::now()).unwrap();

        state.reorder_groups(&[c.id, a.id, b.id]).unwrap();
        assert_eq!(positions(&state), vec![(c.id, 0), (a.id, 1), (b.id, 2)]);

        let before = positions(&state);
        assert!(matches!(
            state.reorder_groups(&[a.id, b.id]),
            Err(ServiceError::OrderMismatch(_))
        ));
        assert!(matches!(
            state.reorder_groups(&[a.id, a.id, b.id]),
            Err(ServiceError::OrderMismatch(_))
        ));
        assert_eq!(positions(&state), before);
    }

    #[test]
    fn test_group_summaries_count_members() {
        let mut state = WatchlistState::default();
        let g = state.create_group("g", Utc::now()).unwrap();
        state.add("A", "A", "", Some(g.id), Utc::now()).unwrap();
        state.add("B", "B", "", None, Utc::now()).unwrap();

        let summaries = state.group_summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].item_count, 1);
        assert_eq!(summaries[0].group.name, "g");
    }
}
