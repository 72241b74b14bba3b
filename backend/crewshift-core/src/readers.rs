// src/readers.rs
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::day_window::DayWindow;
use crate::model::{
    ElectricianId, ElectricianStatus, PlannedSlot, ShiftOpening, TeamId, TeamJustification,
};
use crate::store::{ScheduleStore, ShiftEventStore, StoreError};

/// Planned side of reconciliation: slots, published teams and the per-slot
/// status lookups. Every read is an explicit store call; nothing is cached.
#[derive(Clone)]
pub struct ScheduleReader {
    store: Arc<dyn ScheduleStore>,
    window: DayWindow,
}

impl ScheduleReader {
    pub fn new(store: Arc<dyn ScheduleStore>, window: DayWindow) -> Self {
        Self { store, window }
    }

    pub async fn slots_for(
        &self,
        team_id: TeamId,
        day: NaiveDate,
    ) -> Result<Vec<PlannedSlot>, StoreError> {
        let range = self.window.range_for_date(day);
        let slots = self.store.find_slots(team_id, &range).await?;
        debug!(team_id, day = %day, count = slots.len(), "Loaded planned slots");
        Ok(slots)
    }

    /// Electricians with a planned slot on `day` under any team.
    pub async fn scheduled_electricians(
        &self,
        day: NaiveDate,
    ) -> Result<HashSet<ElectricianId>, StoreError> {
        let range = self.window.range_for_date(day);
        Ok(self
            .store
            .find_slots_for_day(&range)
            .await?
            .into_iter()
            .map(|s| s.electrician_id)
            .collect())
    }

    pub async fn published_teams(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<TeamId>, StoreError> {
        self.store.find_published_teams(start, end).await
    }

    pub async fn electrician_status(
        &self,
        electrician_id: ElectricianId,
    ) -> Result<Option<ElectricianStatus>, StoreError> {
        self.store.find_electrician_status(electrician_id).await
    }

    pub async fn approved_justifications(
        &self,
        team_id: TeamId,
        day: NaiveDate,
    ) -> Result<Vec<TeamJustification>, StoreError> {
        self.store.find_approved_team_justifications(team_id, day).await
    }
}

/// What one electrician actually did on a day.
#[derive(Debug, Clone, Default)]
pub struct ElectricianOpenings {
    /// Teams in order of first appearance in the id-sorted openings.
    pub teams_opened: Vec<TeamId>,
    pub openings: Vec<ShiftOpening>,
}

impl ElectricianOpenings {
    pub fn opened_under(&self, team_id: TeamId) -> bool {
        self.teams_opened.contains(&team_id)
    }

    /// First team other than `planned_team`, in stable opening-id order.
    pub fn first_other_team(&self, planned_team: TeamId) -> Option<TeamId> {
        self.teams_opened
            .iter()
            .copied()
            .find(|team| *team != planned_team)
    }

    /// The opening under `team_id` if any, else the first opening.
    pub fn preferred_opening(&self, team_id: TeamId) -> Option<&ShiftOpening> {
        self.openings
            .iter()
            .find(|o| o.team_id == team_id)
            .or_else(|| self.openings.first())
    }
}

#[derive(Debug, Clone, Default)]
pub struct DayOpenings {
    by_electrician: BTreeMap<ElectricianId, ElectricianOpenings>,
}

impl DayOpenings {
    pub fn from_openings(mut openings: Vec<ShiftOpening>) -> Self {
        openings.sort_by_key(|o| o.id);
        let mut by_electrician: BTreeMap<ElectricianId, ElectricianOpenings> = BTreeMap::new();
        for opening in openings {
            let entry = by_electrician.entry(opening.electrician_id).or_default();
            if !entry.teams_opened.contains(&opening.team_id) {
                entry.teams_opened.push(opening.team_id);
            }
            entry.openings.push(opening);
        }
        Self { by_electrician }
    }

    pub fn get(&self, electrician_id: ElectricianId) -> Option<&ElectricianOpenings> {
        self.by_electrician.get(&electrician_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ElectricianId, &ElectricianOpenings)> {
        self.by_electrician.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.by_electrician.is_empty()
    }
}

/// Observed side of reconciliation. Deliberately not filtered by team: an
/// electrician may show up under a team other than the planned one.
#[derive(Clone)]
pub struct ShiftEventReader {
    store: Arc<dyn ShiftEventStore>,
    window: DayWindow,
}

impl ShiftEventReader {
    pub fn new(store: Arc<dyn ShiftEventStore>, window: DayWindow) -> Self {
        Self { store, window }
    }

    pub async fn openings_for(&self, day: NaiveDate) -> Result<DayOpenings, StoreError> {
        let range = self.window.range_for_date(day);
        let openings = self.store.find_openings(&range).await?;
        debug!(day = %day, count = openings.len(), "Loaded shift openings");
        Ok(DayOpenings::from_openings(openings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn opening(id: i64, electrician_id: i64, team_id: i64) -> ShiftOpening {
        ShiftOpening {
            id,
            electrician_id,
            team_id,
            opened_at: DateTime::parse_from_rfc3339("2024-03-05T11:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            closed_at: None,
        }
    }

    #[test]
    fn groups_by_electrician_in_opening_id_order() {
        let day = DayOpenings::from_openings(vec![
            opening(30, 1, 7),
            opening(10, 1, 9),
            opening(20, 2, 5),
            opening(40, 1, 9),
        ]);
        let e1 = day.get(1).unwrap();
        assert_eq!(e1.teams_opened, vec![9, 7]);
        assert_eq!(
            e1.openings.iter().map(|o| o.id).collect::<Vec<_>>(),
            vec![10, 30, 40]
        );
        assert_eq!(e1.first_other_team(5), Some(9));
        assert_eq!(e1.first_other_team(9), Some(7));
        assert!(day.get(3).is_none());
    }

    #[test]
    fn preferred_opening_favors_planned_team() {
        let day = DayOpenings::from_openings(vec![opening(1, 1, 4), opening(2, 1, 8)]);
        let e1 = day.get(1).unwrap();
        assert_eq!(e1.preferred_opening(8).unwrap().id, 2);
        assert_eq!(e1.preferred_opening(99).unwrap().id, 1);
    }
}
