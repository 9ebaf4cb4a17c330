//! Scheduler domains and groups.
//!
//! Domains are a static, hierarchical partition of the CPU topology built
//! once at boot; they are the only authority on which CPUs may exchange
//! work during load balancing. Both tables are fixed capacity: running out
//! of slots is a boot-time configuration defect, surfaced as `ENOSPC`.

use arrayvec::ArrayVec;

use crate::posix::Errno;

use super::types::{CpuId, CpuMask};

/// Maximum scheduler domains.
pub const MAX_DOMAINS: usize = 8;

/// Maximum groups per domain.
pub const MAX_GROUPS: usize = 8;

bitflags::bitflags! {
    /// Behavior flags of a scheduler domain.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct SdFlags: u32 {
        /// Periodic load balancing runs over this domain.
        const LOAD_BALANCE   = 1 << 0;
        /// Balance when a CPU is about to go idle.
        const BALANCE_NEWIDLE = 1 << 1;
        /// Prefer waking tasks near their waker.
        const WAKE_AFFINE    = 1 << 2;
    }
}

pub type DomainId = usize;
pub type GroupId = usize;

/// A set of CPUs inside a domain. Groups of one domain partition the
/// domain's span without overlap.
#[derive(Clone, Copy, Debug)]
pub struct SchedGroup {
    pub id: GroupId,
    pub cpus: CpuMask,
}

/// One level of the balancing hierarchy.
pub struct SchedDomain {
    pub id: DomainId,
    pub parent: Option<DomainId>,
    pub flags: SdFlags,

    // Balancing tunables, in ticks / percent.
    pub min_interval: u64,
    pub max_interval: u64,
    pub busy_factor: u32,
    pub imbalance_pct: u32,
    pub cache_nice_tries: u32,

    /// Tick of the last balancing pass that examined this domain.
    pub last_balance: u64,

    groups: ArrayVec<SchedGroup, MAX_GROUPS>,
}

impl SchedDomain {
    fn new(id: DomainId, parent: Option<DomainId>, flags: SdFlags) -> Self {
        Self {
            id,
            parent,
            flags,
            min_interval: 8,
            max_interval: 64,
            busy_factor: 32,
            imbalance_pct: 125,
            cache_nice_tries: 1,
            last_balance: 0,
            groups: ArrayVec::new(),
        }
    }

    pub fn groups(&self) -> &[SchedGroup] {
        &self.groups
    }

    /// Union of all group spans.
    pub fn span(&self) -> CpuMask {
        self.groups
            .iter()
            .fold(CpuMask::empty(), |acc, g| acc.or(g.cpus))
    }

    pub fn contains_cpu(&self, cpu: CpuId) -> bool {
        self.span().is_set(cpu)
    }
}

/// The fixed domain/group tables.
pub struct DomainTable {
    domains: ArrayVec<SchedDomain, MAX_DOMAINS>,
}

impl DomainTable {
    pub fn new() -> Self {
        Self {
            domains: ArrayVec::new(),
        }
    }

    /// Allocate the next free domain slot.
    pub fn domain_create(&mut self, parent: Option<DomainId>, flags: SdFlags) -> Result<DomainId, Errno> {
        if self.domains.is_full() {
            return Err(Errno::ENOSPC);
        }
        if let Some(p) = parent {
            if p >= self.domains.len() {
                return Err(Errno::EINVAL);
            }
        }
        let id = self.domains.len();
        self.domains.push(SchedDomain::new(id, parent, flags));
        Ok(id)
    }

    /// Allocate the next free group slot inside `domain`.
    pub fn domain_add_group(&mut self, domain: DomainId, cpus: CpuMask) -> Result<GroupId, Errno> {
        let dom = self.domains.get_mut(domain).ok_or(Errno::EINVAL)?;
        if dom.groups.is_full() {
            return Err(Errno::ENOSPC);
        }
        // Groups partition the span: reject overlap outright.
        if dom.groups.iter().any(|g| !g.cpus.and(cpus).is_empty()) {
            return Err(Errno::EINVAL);
        }
        let id = dom.groups.len();
        dom.groups.push(SchedGroup { id, cpus });
        Ok(id)
    }

    pub fn get(&self, id: DomainId) -> Option<&SchedDomain> {
        self.domains.get(id)
    }

    pub fn get_mut(&mut self, id: DomainId) -> Option<&mut SchedDomain> {
        self.domains.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SchedDomain> {
        self.domains.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SchedDomain> {
        self.domains.iter_mut()
    }

    /// First domain whose span covers `cpu`.
    pub fn find_for_cpu(&self, cpu: CpuId) -> Option<&SchedDomain> {
        self.domains.iter().find(|d| d.contains_cpu(cpu))
    }

    /// Group of `domain` that contains `cpu`.
    pub fn find_group_for_cpu(&self, domain: DomainId, cpu: CpuId) -> Option<&SchedGroup> {
        self.domains
            .get(domain)?
            .groups
            .iter()
            .find(|g| g.cpus.is_set(cpu))
    }

    /// Span of `domain`, if it exists.
    pub fn get_cpu_mask(&self, domain: DomainId) -> Option<CpuMask> {
        self.domains.get(domain).map(|d| d.span())
    }
}

impl Default for DomainTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the boot-time domain layout: with more than one online CPU, one
/// flat balancing domain with a single-CPU group per online CPU, so every
/// CPU sees every other as a balancing peer; with one CPU, no domains at
/// all (balancing is a no-op). Beyond [`MAX_GROUPS`] CPUs the span is
/// split into contiguous chunks instead.
pub fn sched_domain_init(table: &mut DomainTable, online: CpuMask) -> Result<(), Errno> {
    let nr_online = online.count();
    if nr_online <= 1 {
        log::info!("sched: single CPU online, no scheduler domains built");
        return Ok(());
    }
    let dom = table.domain_create(None, SdFlags::LOAD_BALANCE | SdFlags::WAKE_AFFINE)?;
    if nr_online <= MAX_GROUPS {
        for cpu in online.iter() {
            table.domain_add_group(dom, CpuMask::single(cpu))?;
        }
    } else {
        let per_group = (nr_online + MAX_GROUPS - 1) / MAX_GROUPS;
        let mut chunk = CpuMask::empty();
        for cpu in online.iter() {
            chunk.set(cpu);
            if chunk.count() == per_group {
                table.domain_add_group(dom, chunk)?;
                chunk = CpuMask::empty();
            }
        }
        if !chunk.is_empty() {
            table.domain_add_group(dom, chunk)?;
        }
    }
    log::info!(
        "sched: built flat domain {} spanning {} CPUs",
        dom,
        nr_online
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_until_full_then_enospc() {
        let mut table = DomainTable::new();
        for _ in 0..MAX_DOMAINS {
            table.domain_create(None, SdFlags::LOAD_BALANCE).unwrap();
        }
        assert_eq!(
            table.domain_create(None, SdFlags::LOAD_BALANCE),
            Err(Errno::ENOSPC)
        );
    }

    #[test]
    fn groups_partition_without_overlap() {
        let mut table = DomainTable::new();
        let dom = table.domain_create(None, SdFlags::LOAD_BALANCE).unwrap();
        table.domain_add_group(dom, CpuMask::from_bits(0b0011)).unwrap();
        table.domain_add_group(dom, CpuMask::from_bits(0b1100)).unwrap();
        // Overlapping group is rejected.
        assert_eq!(
            table.domain_add_group(dom, CpuMask::from_bits(0b0110)),
            Err(Errno::EINVAL)
        );
        assert_eq!(table.get(dom).unwrap().span(), CpuMask::from_bits(0b1111));
    }

    #[test]
    fn group_table_full_is_enospc() {
        let mut table = DomainTable::new();
        let dom = table.domain_create(None, SdFlags::LOAD_BALANCE).unwrap();
        for i in 0..MAX_GROUPS {
            table
                .domain_add_group(dom, CpuMask::single(i as CpuId))
                .unwrap();
        }
        assert_eq!(
            table.domain_add_group(dom, CpuMask::single(MAX_GROUPS as CpuId)),
            Err(Errno::ENOSPC)
        );
    }

    #[test]
    fn lookups_scan_the_tables() {
        let mut table = DomainTable::new();
        let dom = table.domain_create(None, SdFlags::LOAD_BALANCE).unwrap();
        table.domain_add_group(dom, CpuMask::from_bits(0b01)).unwrap();
        table.domain_add_group(dom, CpuMask::from_bits(0b10)).unwrap();

        assert!(table.find_for_cpu(0).is_some());
        assert!(table.find_for_cpu(5).is_none());
        assert_eq!(table.find_group_for_cpu(dom, 1).unwrap().id, 1);
        assert_eq!(table.get_cpu_mask(dom), Some(CpuMask::from_bits(0b11)));
    }

    #[test]
    fn single_cpu_builds_no_domains() {
        let mut table = DomainTable::new();
        sched_domain_init(&mut table, CpuMask::single(0)).unwrap();
        assert!(table.is_empty());

        let mut table = DomainTable::new();
        sched_domain_init(&mut table, CpuMask::first_n(4)).unwrap();
        assert_eq!(table.len(), 1);
        // One balancing peer group per online CPU.
        assert_eq!(table.get(0).unwrap().groups().len(), 4);
        assert_eq!(table.get(0).unwrap().span(), CpuMask::first_n(4));
    }
}
