//! Status helper enums mapping to SMALLSERIAL/SMALLINT lookup tables.
//!
//! Each enum variant's discriminant matches the seed data order (1-based)
//! in the corresponding `*_statuses` database table.

/// Status ID type matching SMALLINT/SMALLSERIAL in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:expr => $label:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Look up a variant by its database status ID.
            pub fn from_id(id: StatusId) -> Option<Self> {
                match id {
                    $( $val => Some(Self::$variant), )+
                    _ => None,
                }
            }

            /// Lookup-table name of this status.
            pub fn name(self) -> &'static str {
                match self {
                    $( Self::$variant => $label, )+
                }
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

define_status_enum! {
    /// Provisioning job lifecycle status.
    ///
    /// `Succeeded` is terminal. `Failed` is terminal only once the job has
    /// no `next_run_at` (retries exhausted).
    ProvisioningJobStatus {
        Pending = 1 => "pending",
        Running = 2 => "running",
        Succeeded = 3 => "succeeded",
        Failed = 4 => "failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_match_seed_order() {
        assert_eq!(ProvisioningJobStatus::Pending.id(), 1);
        assert_eq!(ProvisioningJobStatus::Running.id(), 2);
        assert_eq!(ProvisioningJobStatus::Succeeded.id(), 3);
        assert_eq!(ProvisioningJobStatus::Failed.id(), 4);
    }

    #[test]
    fn from_id_round_trips() {
        for status in [
            ProvisioningJobStatus::Pending,
            ProvisioningJobStatus::Running,
            ProvisioningJobStatus::Succeeded,
            ProvisioningJobStatus::Failed,
        ] {
            assert_eq!(ProvisioningJobStatus::from_id(status.id()), Some(status));
        }
        assert_eq!(ProvisioningJobStatus::from_id(0), None);
        assert_eq!(ProvisioningJobStatus::from_id(9), None);
    }

    #[test]
    fn display_uses_lookup_name() {
        assert_eq!(ProvisioningJobStatus::Failed.to_string(), "failed");
    }
}
