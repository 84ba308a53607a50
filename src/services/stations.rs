//! Area topology store
//!
//! Areas are the atomic location units routes and telemetry refer to.
//! The graph is seeded from config at startup and can be extended at
//! runtime through the admin endpoints. Edges are directed.

use crate::domain::error::ServiceError;
use crate::domain::types::{Area, AreaEdge};
use crate::infra::Config;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::info;

pub struct AreaTopology {
    areas: RwLock<FxHashMap<String, Area>>,
}

impl AreaTopology {
    pub fn new() -> Self {
        Self { areas: RwLock::new(FxHashMap::default()) }
    }

    /// Build a topology from the seed lists in the config file
    pub fn from_config(config: &Config) -> Self {
        let topology = Self::new();

        for seed in config.areas() {
            topology.upsert_area(Area {
                area_id: seed.area_id.clone(),
                name: seed.name.clone(),
                is_station: seed.is_station,
                neighbours: Vec::new(),
            });
        }

        for seed in config.edges() {
            if let Err(e) = topology.add_edge(
                &seed.from_area_id,
                AreaEdge {
                    to_area_id: seed.to_area_id.clone(),
                    travel_minutes: seed.travel_minutes,
                },
            ) {
                tracing::warn!(
                    from = %seed.from_area_id,
                    to = %seed.to_area_id,
                    error = %e,
                    "topology_seed_edge_skipped"
                );
            }
        }

        let count = topology.areas.read().len();
        info!(areas = count, "topology_seeded");
        topology
    }

    pub fn upsert_area(&self, area: Area) {
        let mut areas = self.areas.write();
        // Preserve existing edges when the node is re-registered
        if let Some(existing) = areas.get(&area.area_id) {
            let neighbours = existing.neighbours.clone();
            areas.insert(area.area_id.clone(), Area { neighbours, ..area });
        } else {
            areas.insert(area.area_id.clone(), area);
        }
    }

    /// Add a directed edge. Both endpoints must already exist; a repeated
    /// edge replaces the old travel time.
    pub fn add_edge(&self, from_area_id: &str, edge: AreaEdge) -> Result<(), ServiceError> {
        let mut areas = self.areas.write();
        if !areas.contains_key(&edge.to_area_id) {
            return Err(ServiceError::NotFound(format!("area {}", edge.to_area_id)));
        }
        let from = areas
            .get_mut(from_area_id)
            .ok_or_else(|| ServiceError::NotFound(format!("area {}", from_area_id)))?;

        if let Some(existing) = from.neighbours.iter_mut().find(|n| n.to_area_id == edge.to_area_id)
        {
            existing.travel_minutes = edge.travel_minutes;
        } else {
            from.neighbours.push(edge);
        }
        Ok(())
    }

    pub fn get(&self, area_id: &str) -> Option<Area> {
        self.areas.read().get(area_id).cloned()
    }

    pub fn list(&self) -> Vec<Area> {
        let mut areas: Vec<Area> = self.areas.read().values().cloned().collect();
        areas.sort_by(|a, b| a.area_id.cmp(&b.area_id));
        areas
    }

    pub fn area_exists(&self, area_id: &str) -> bool {
        self.areas.read().contains_key(area_id)
    }

    pub fn edge_exists(&self, from_area_id: &str, to_area_id: &str) -> bool {
        self.areas
            .read()
            .get(from_area_id)
            .map(|a| a.neighbours.iter().any(|n| n.to_area_id == to_area_id))
            .unwrap_or(false)
    }
}

impl Default for AreaTopology {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn area(id: &str, station: bool) -> Area {
        Area {
            area_id: id.to_string(),
            name: id.to_string(),
            is_station: station,
            neighbours: Vec::new(),
        }
    }

    #[test]
    fn test_add_edge_requires_both_endpoints() {
        let topo = AreaTopology::new();
        topo.upsert_area(area("A", false));

        let err = topo
            .add_edge("A", AreaEdge { to_area_id: "B".into(), travel_minutes: 2 })
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        topo.upsert_area(area("B", true));
        topo.add_edge("A", AreaEdge { to_area_id: "B".into(), travel_minutes: 2 }).unwrap();
        assert!(topo.edge_exists("A", "B"));
        // Edges are directed
        assert!(!topo.edge_exists("B", "A"));
    }

    #[test]
    fn test_upsert_preserves_edges() {
        let topo = AreaTopology::new();
        topo.upsert_area(area("A", false));
        topo.upsert_area(area("B", true));
        topo.add_edge("A", AreaEdge { to_area_id: "B".into(), travel_minutes: 3 }).unwrap();

        topo.upsert_area(area("A", true));
        assert!(topo.edge_exists("A", "B"));
        assert!(topo.get("A").unwrap().is_station);
    }

    #[test]
    fn test_repeated_edge_replaces_travel_time() {
        let topo = AreaTopology::new();
        topo.upsert_area(area("A", false));
        topo.upsert_area(area("B", true));
        topo.add_edge("A", AreaEdge { to_area_id: "B".into(), travel_minutes: 3 }).unwrap();
        topo.add_edge("A", AreaEdge { to_area_id: "B".into(), travel_minutes: 7 }).unwrap();

        let a = topo.get("A").unwrap();
        assert_eq!(a.neighbours.len(), 1);
        assert_eq!(a.neighbours[0].travel_minutes, 7);
    }
}
