use crate::Address;

/// The ordered set of peer addresses a replica believes make up the cluster,
/// plus the address it currently believes is leader. Mutated only at
/// bootstrap and by the membership RPCs (`apply_membership`/`update_membership`).
#[derive(Debug, Clone, Default)]
pub struct ClusterRegistry {
    members: Vec<Address>,
    pub leader: Option<Address>,
}

impl ClusterRegistry {
    pub fn bootstrap(self_addr: Address) -> Self {
        Self { members: vec![self_addr], leader: None }
    }

    /// Adopt a membership list handed back by a leader's `apply_membership` reply.
    pub fn from_members(members: Vec<Address>) -> Self {
        Self { members, leader: None }
    }

    pub fn members(&self) -> &[Address] {
        &self.members
    }

    pub fn contains(&self, addr: &Address) -> bool {
        self.members.iter().any(|m| m == addr)
    }

    /// Appends `addr` if not already present. Returns whether it was newly added.
    pub fn add_member(&mut self, addr: Address) -> bool {
        if self.contains(&addr) {
            return false;
        }
        self.members.push(addr);
        true
    }

    /// Other members excluding `self_addr`, used to fan peer RPCs out.
    pub fn peers_excluding<'a>(&'a self, self_addr: &'a Address) -> impl Iterator<Item = &'a Address> {
        self.members.iter().filter(move |m| *m != self_addr)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// `floor(N/2) + 1` of the current membership.
    pub fn majority(&self) -> usize {
        self.members.len() / 2 + 1
    }
}
