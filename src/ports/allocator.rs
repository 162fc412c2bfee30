//! Port allocation for one target.

use serde::Serialize;
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::config::{ResolvedConfig, Target};
use crate::error::{PortConflict, PortError, Result};

use super::plan::{PortAssignment, PortPlan, PortSource, ASSIGNED_PORTS_PATH};

/// Holder name used in conflicts with reserved ports.
const RESERVED_HOLDER: &str = "reserved";

/// The ports assigned for one target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PortAllocation {
    /// Assignments in the order they were made.
    pub assignments: Vec<PortAssignment>,
}

impl PortAllocation {
    /// The port assigned to `service`.
    #[must_use]
    pub fn get(&self, service: &str) -> Option<u16> {
        self.assignments.iter().find(|a| a.service == service).map(|a| a.port)
    }

    /// Service to port, sorted by service name.
    #[must_use]
    pub fn as_map(&self) -> BTreeMap<String, u16> {
        self.assignments.iter().map(|a| (a.service.clone(), a.port)).collect()
    }

    /// Number of assignments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    /// Returns true if nothing was assigned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Renders the allocation as a `service: port` mapping in assignment order.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut mapping = Mapping::new();
        for assignment in &self.assignments {
            mapping.insert(Value::from(assignment.service.clone()), Value::from(assignment.port));
        }
        Value::Mapping(mapping)
    }

    /// Writes the allocation into `config` under `ports.assigned`.
    #[must_use]
    pub fn apply_to(&self, config: ResolvedConfig) -> ResolvedConfig {
        config.with_value(ASSIGNED_PORTS_PATH, self.to_value())
    }
}

/// Assigns ports from a [`PortPlan`].
#[derive(Debug, Clone)]
pub struct PortAllocator {
    plan: PortPlan,
}

/// Bookkeeping for one allocation run.
struct Ledger<'a> {
    plan: &'a PortPlan,
    taken: HashMap<u16, String>,
    assignments: Vec<PortAssignment>,
}

impl<'a> Ledger<'a> {
    fn new(plan: &'a PortPlan) -> Self {
        Self {
            plan,
            taken: HashMap::new(),
            assignments: Vec::new(),
        }
    }

    fn has(&self, service: &str) -> bool {
        self.assignments.iter().any(|a| a.service == service)
    }

    /// Who already holds `port`, if anyone.
    fn holder(&self, port: u16) -> Option<&str> {
        if self.plan.reserved().contains(&port) {
            return Some(RESERVED_HOLDER);
        }
        self.taken.get(&port).map(String::as_str)
    }

    fn take(&mut self, service: &str, port: u16, source: PortSource) {
        self.taken.insert(port, service.to_string());
        self.assignments.push(PortAssignment {
            service: service.to_string(),
            port,
            source,
        });
    }

    /// Accepts a fixed port or records why it cannot be accepted.
    fn take_fixed(&mut self, service: &str, port: u16, source: PortSource, conflicts: &mut Vec<PortConflict>) {
        match self.holder(port) {
            Some(holder) => conflicts.push(PortConflict {
                service: service.to_string(),
                port,
                held_by: holder.to_string(),
            }),
            None => self.take(service, port, source),
        }
    }
}

impl PortAllocator {
    /// Creates an allocator for a plan.
    #[must_use]
    pub const fn new(plan: PortPlan) -> Self {
        Self { plan }
    }

    /// The plan this allocator draws from.
    #[must_use]
    pub const fn plan(&self) -> &PortPlan {
        &self.plan
    }

    /// Assigns a port to every external service and every requested service.
    ///
    /// External ports are taken verbatim, then the target platform's
    /// overrides, then the environment range is scanned in ascending order
    /// for the rest. Reserved ports are never assigned.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::Conflict`] listing every colliding fixed port,
    /// [`PortError::MissingRange`] if services need a range and none is
    /// declared, or [`PortError::RangeExhausted`] naming the services left
    /// without a port.
    pub fn allocate(&self, target: &Target, requested: &[String]) -> Result<PortAllocation> {
        let mut ledger = Ledger::new(&self.plan);
        let mut conflicts = Vec::new();

        for (service, port) in self.plan.external() {
            if ledger.has(service) {
                continue;
            }
            ledger.take_fixed(service, *port, PortSource::External, &mut conflicts);
        }

        for (service, port) in self.plan.overrides_for(target.platform) {
            if !requested.iter().any(|r| r == service) {
                debug!("Ignoring {} override for unrequested service '{service}'", target.platform);
                continue;
            }
            if let Some(existing) = ledger.assignments.iter().find(|a| a.service == service) {
                if existing.port != port {
                    conflicts.push(PortConflict {
                        service: service.to_string(),
                        port,
                        held_by: format!("{service} (external port {})", existing.port),
                    });
                }
                continue;
            }
            ledger.take_fixed(service, port, PortSource::Override, &mut conflicts);
        }

        if !conflicts.is_empty() {
            return Err(PortError::Conflict { conflicts }.into());
        }

        let mut remaining: Vec<&str> = Vec::new();
        for service in requested {
            if !ledger.has(service) && !remaining.contains(&service.as_str()) {
                remaining.push(service);
            }
        }

        if !remaining.is_empty() {
            let range = self
                .plan
                .range_for(target.environment)
                .ok_or_else(|| PortError::MissingRange {
                    environment: target.environment.to_string(),
                })?;

            let mut candidates = range.start..=range.end;
            let mut unassigned = Vec::new();
            for service in remaining {
                let free = candidates.by_ref().find(|port| ledger.holder(*port).is_none());
                match free {
                    Some(port) => ledger.take(service, port, PortSource::Range),
                    None => unassigned.push(service.to_string()),
                }
            }

            if !unassigned.is_empty() {
                return Err(PortError::RangeExhausted {
                    environment: target.environment.to_string(),
                    start: range.start,
                    end: range.end,
                    unassigned,
                }
                .into());
            }
        }

        debug!("Assigned {} port(s) for {target}", ledger.assignments.len());
        Ok(PortAllocation {
            assignments: ledger.assignments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Environment, Platform};
    use crate::error::ForgeError;

    fn dev(platform: Platform) -> Target {
        Target::new(Environment::Development, platform)
    }

    fn services(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    fn plan() -> PortPlan {
        PortPlan::new()
            .with_range("development", 7001, 7999)
            .unwrap()
            .with_reserved(22)
    }

    #[test]
    fn test_sequential_assignment_from_range_start() {
        let allocation = PortAllocator::new(plan())
            .allocate(&dev(Platform::Local), &services(&["app", "metrics"]))
            .unwrap();
        assert_eq!(allocation.get("app"), Some(7001));
        assert_eq!(allocation.get("metrics"), Some(7002));
        assert!(allocation.assignments.iter().all(|a| a.source == PortSource::Range));
    }

    #[test]
    fn test_external_ports_are_verbatim_and_skipped_by_scan() {
        let plan = plan().with_external("ollama", 11434).with_external("sidecar", 7001);
        let allocation = PortAllocator::new(plan)
            .allocate(&dev(Platform::Local), &services(&["app", "ollama"]))
            .unwrap();
        assert_eq!(allocation.get("ollama"), Some(11434));
        assert_eq!(allocation.get("sidecar"), Some(7001));
        assert_eq!(allocation.get("app"), Some(7002));
        assert_eq!(allocation.len(), 3);
    }

    #[test]
    fn test_reserved_ports_are_skipped() {
        let plan = PortPlan::new()
            .with_range("dev", 7001, 7010)
            .unwrap()
            .with_reserved(7001)
            .with_reserved(7002);
        let allocation = PortAllocator::new(plan)
            .allocate(&dev(Platform::Docker), &services(&["app"]))
            .unwrap();
        assert_eq!(allocation.get("app"), Some(7003));
    }

    #[test]
    fn test_platform_override_wins_over_range() {
        let plan = plan().with_override("docker", "app", 7500);
        let allocation = PortAllocator::new(plan.clone())
            .allocate(&dev(Platform::Docker), &services(&["app", "metrics"]))
            .unwrap();
        assert_eq!(allocation.get("app"), Some(7500));
        assert_eq!(allocation.get("metrics"), Some(7001));

        let local = PortAllocator::new(plan)
            .allocate(&dev(Platform::Local), &services(&["app"]))
            .unwrap();
        assert_eq!(local.get("app"), Some(7001));
    }

    #[test]
    fn test_override_collisions_are_all_reported() {
        let plan = plan()
            .with_external("ollama", 11434)
            .with_override("docker", "app", 11434)
            .with_override("docker", "metrics", 22);
        match PortAllocator::new(plan).allocate(&dev(Platform::Docker), &services(&["app", "metrics"])) {
            Err(ForgeError::Port(PortError::Conflict { conflicts })) => {
                assert_eq!(conflicts.len(), 2);
                assert_eq!(conflicts[0].held_by, "ollama");
                assert_eq!(conflicts[1].held_by, "reserved");
            }
            other => panic!("expected conflicts, got {other:?}"),
        }
    }

    #[test]
    fn test_exhaustion_names_unassigned_services() {
        let plan = PortPlan::new().with_range("development", 7001, 7002).unwrap();
        match PortAllocator::new(plan).allocate(&dev(Platform::Local), &services(&["a", "b", "c", "d"])) {
            Err(ForgeError::Port(PortError::RangeExhausted { unassigned, .. })) => {
                assert_eq!(unassigned, vec!["c", "d"]);
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_range_only_matters_when_needed() {
        let allocator = PortAllocator::new(PortPlan::new().with_external("ollama", 11434));
        let target = Target::new(Environment::Staging, Platform::Cloud);
        assert!(allocator.allocate(&target, &services(&["ollama"])).is_ok());
        assert!(matches!(
            allocator.allocate(&target, &services(&["app"])),
            Err(ForgeError::Port(PortError::MissingRange { .. }))
        ));
    }

    #[test]
    fn test_duplicate_requests_get_one_port() {
        let allocation = PortAllocator::new(plan())
            .allocate(&dev(Platform::Local), &services(&["app", "app"]))
            .unwrap();
        assert_eq!(allocation.len(), 1);
    }
}
