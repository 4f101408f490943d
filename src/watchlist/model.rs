use crate::core::{ServiceError, ServiceResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::hash::Hash;

pub type GroupId = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchlistItem {
    pub fund_code: String,
    pub fund_name: String,
    pub fund_type: String,
    /// `None` places the item in the ungrouped partition
    pub group_id: Option<GroupId>,
    pub position: u32,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub position: u32,
    pub created_at: DateTime<Utc>,
}

/// One partition of the watchlist as returned by [`WatchlistState::sections`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchlistSection {
    pub group: Option<Group>,
    pub items: Vec<WatchlistItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchDeleteOutcome {
    pub fund_code: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Whole watchlist held in memory and persisted as one document. Every
/// operation either fully applies or returns an error with `self` untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchlistState {
    pub(super) items: Vec<WatchlistItem>,
    pub(super) groups: Vec<Group>,
    pub(super) next_group_id: GroupId,
}

impl Default for WatchlistState {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            groups: Vec::new(),
            next_group_id: 1,
        }
    }
}

/// True when `requested` holds every element of `current` exactly once.
pub(super) fn is_permutation<T: Eq + Hash>(requested: &[T], current: &HashSet<T>) -> bool {
    let unique: HashSet<&T> = requested.iter().collect();
    requested.len() == current.len()
        && unique.len() == requested.len()
        && requested.iter().all(|value| current.contains(value))
}

impl WatchlistState {
    pub(super) fn has_group(&self, group_id: GroupId) -> bool {
        self.groups.iter().any(|g| g.id == group_id)
    }

    fn require_group(&self, group_id: Option<GroupId>) -> ServiceResult<()> {
        match group_id {
            Some(id) if !self.has_group(id) => Err(ServiceError::NotFound(format!("Group {id}"))),
            _ => Ok(()),
        }
    }

    fn index_of(&self, fund_code: &str) -> ServiceResult<usize> {
        self.items
            .iter()
            .position(|item| item.fund_code == fund_code)
            .ok_or_else(|| ServiceError::NotFound(format!("Fund {fund_code}")))
    }

    pub(super) fn next_position(&self, group_id: Option<GroupId>) -> u32 {
        self.items
            .iter()
            .filter(|item| item.group_id == group_id)
            .map(|item| item.position + 1)
            .max()
            .unwrap_or(0)
    }

    /// Items of one partition in position order.
    pub fn partition(&self, group_id: Option<GroupId>) -> Vec<&WatchlistItem> {
        let mut members: Vec<&WatchlistItem> = self
            .items
            .iter()
            .filter(|item| item.group_id == group_id)
            .collect();
        members.sort_by_key(|item| item.position);
        members
    }

    /// Renumbers a partition to 0..n-1 keeping the current relative order.
    pub(super) fn close_gaps(&mut self, group_id: Option<GroupId>) {
        let mut indices: Vec<usize> = (0..self.items.len())
            .filter(|&i| self.items[i].group_id == group_id)
            .collect();
        indices.sort_by_key(|&i| self.items[i].position);
        for (position, index) in (0u32..).zip(indices) {
            self.items[index].position = position;
        }
    }

    pub fn contains(&self, fund_code: &str) -> bool {
        self.items.iter().any(|item| item.fund_code == fund_code)
    }

    pub fn item(&self, fund_code: &str) -> Option<&WatchlistItem> {
        self.items.iter().find(|item| item.fund_code == fund_code)
    }

    pub fn fund_codes(&self) -> Vec<String> {
        self.sections()
            .into_iter()
            .flat_map(|section| section.items)
            .map(|item| item.fund_code)
            .collect()
    }

    pub fn add(
        &mut self,
        fund_code: &str,
        fund_name: &str,
        fund_type: &str,
        group_id: Option<GroupId>,
        now: DateTime<Utc>,
    ) -> ServiceResult<WatchlistItem> {
        let fund_code = fund_code.trim();
        if fund_code.is_empty() {
            return Err(ServiceError::InvalidInput(
                "fund_code must not be empty".to_string(),
            ));
        }
        if self.contains(fund_code) {
            return Err(ServiceError::DuplicateKey(format!("Fund {fund_code}")));
        }
        self.require_group(group_id)?;

        let item = WatchlistItem {
            fund_code: fund_code.to_string(),
            fund_name: fund_name.to_string(),
            fund_type: fund_type.to_string(),
            group_id,
            position: self.next_position(group_id),
            added_at: now,
        };
        self.items.push(item.clone());
        Ok(item)
    }

    pub fn remove(&mut self, fund_code: &str) -> ServiceResult<WatchlistItem> {
        let index = self.index_of(fund_code)?;
        let removed = self.items.remove(index);
        self.close_gaps(removed.group_id);
        Ok(removed)
    }

    /// Removes every listed fund that exists. Gaps are closed once per
    /// affected partition after all removals.
    pub fn batch_delete(&mut self, fund_codes: &[String]) -> Vec<BatchDeleteOutcome> {
        let mut touched = HashSet::new();
        let outcomes = fund_codes
            .iter()
            .map(|code| match self.index_of(code) {
                Ok(index) => {
                    let removed = self.items.remove(index);
                    touched.insert(removed.group_id);
                    BatchDeleteOutcome {
                        fund_code: code.clone(),
                        success: true,
                        error: None,
                    }
                }
                Err(e) => BatchDeleteOutcome {
                    fund_code: code.clone(),
                    success: false,
                    error: Some(e.to_string()),
                },
            })
            .collect();
        for group_id in touched {
            self.close_gaps(group_id);
        }
        outcomes
    }

    pub fn reorder(&mut self, fund_codes: &[String], group_id: Option<GroupId>) -> ServiceResult<()> {
        self.require_group(group_id)?;
        let current: HashSet<String> = self
            .items
            .iter()
            .filter(|item| item.group_id == group_id)
            .map(|item| item.fund_code.clone())
            .collect();
        if !is_permutation(fund_codes, &current) {
            return Err(ServiceError::OrderMismatch(format!(
                "expected a permutation of the {} funds in the partition, got {} codes",
                current.len(),
                fund_codes.len()
            )));
        }

        for (position, code) in (0u32..).zip(fund_codes) {
            if let Some(item) = self.items.iter_mut().find(|item| &item.fund_code == code) {
                item.position = position;
            }
        }
        Ok(())
    }

    /// Appends the fund to the end of `group_id`. Moving within the same
    /// partition changes nothing.
    pub fn move_to_group(
        &mut self,
        fund_code: &str,
        group_id: Option<GroupId>,
    ) -> ServiceResult<WatchlistItem> {
        let index = self.index_of(fund_code)?;
        self.require_group(group_id)?;

        let source = self.items[index].group_id;
        if source == group_id {
            return Ok(self.items[index].clone());
        }
        let position = self.next_position(group_id);
        let item = &mut self.items[index];
        item.group_id = group_id;
        item.position = position;
        let moved = item.clone();
        self.close_gaps(source);
        Ok(moved)
    }

    /// Ungrouped items first, then every group in position order.
    pub fn sections(&self) -> Vec<WatchlistSection> {
        let mut sections = vec![WatchlistSection {
            group: None,
            items: self.partition(None).into_iter().cloned().collect(),
        }];
        sections.extend(self.ordered_groups().into_iter().map(|group| WatchlistSection {
            items: self.partition(Some(group.id)).into_iter().cloned().collect(),
            group: Some(group.clone()),
        }));
        sections
    }
}
