//! Process credentials
//!
//! Just enough of a credential model to drive the signal permission
//! policy: real, effective, and saved uids/gids. Credentials are fixed at
//! process creation; the signal subsystem never rewrites them.

/// User ID type
pub type Uid = u32;
/// Group ID type
pub type Gid = u32;

/// Credentials of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    /// Real uid
    pub uid: Uid,
    /// Effective uid
    pub euid: Uid,
    /// Saved uid (from the last set-id exec)
    pub svuid: Uid,
    /// Real gid
    pub gid: Gid,
    /// Effective gid
    pub egid: Gid,
    /// Saved gid
    pub svgid: Gid,
}

impl Credentials {
    /// Superuser credentials
    pub fn root() -> Self {
        Credentials {
            uid: 0,
            euid: 0,
            svuid: 0,
            gid: 0,
            egid: 0,
            svgid: 0,
        }
    }

    /// Ordinary user with matching real/effective/saved ids
    pub fn user(uid: Uid, gid: Gid) -> Self {
        Credentials {
            uid,
            euid: uid,
            svuid: uid,
            gid,
            egid: gid,
            svgid: gid,
        }
    }

    /// Whether these credentials carry superuser privilege.
    #[inline]
    pub fn is_superuser(&self) -> bool {
        self.euid == 0
    }

    /// Real-or-effective uid overlap with another credential's
    /// real-or-saved uids. This is the baseline "may signal" test for
    /// unrelated processes.
    pub fn uid_overlap(&self, target: &Credentials) -> bool {
        self.uid == target.uid
            || self.uid == target.svuid
            || self.euid == target.uid
            || self.euid == target.svuid
    }

    /// Real-or-effective uid match against the target's real-or-effective
    /// uids. The stricter test applied to privilege-elevated targets.
    pub fn uid_match(&self, target: &Credentials) -> bool {
        self.uid == target.uid
            || self.uid == target.euid
            || self.euid == target.uid
            || self.euid == target.euid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_superuser() {
        assert!(Credentials::root().is_superuser());
        assert!(!Credentials::user(1000, 1000).is_superuser());
    }

    #[test]
    fn overlap_covers_saved_uid() {
        let sender = Credentials::user(1000, 1000);
        let mut target = Credentials::user(2000, 2000);
        assert!(!sender.uid_overlap(&target));
        target.svuid = 1000;
        assert!(sender.uid_overlap(&target));
        // The strict match ignores the saved uid
        assert!(!sender.uid_match(&target));
    }
}
