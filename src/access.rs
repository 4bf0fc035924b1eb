// 1.7: who may do what. every privileged engine call takes an Operator and checks a Permission.
// users act on their own rows only; that ownership check lives next to each user-facing call.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Operator,
    Admin,
    SuperAdmin,
    // internal sweeps and derived ledger writes
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Operator => "operator",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    AdjustFunds,
    ReviewOrders,
    OverrideOrders,
    ManagePositions,
    ManageInstruments,
    ReviewWithdrawals,
    ReviewCredit,
    CreditCommission,
    RunSweeps,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    pub id: u64,
    pub role: Role,
}

impl Operator {
    pub fn new(id: u64, role: Role) -> Self {
        Self { id, role }
    }

    // id 0 is reserved for engine-initiated work
    pub fn system() -> Self {
        Self {
            id: 0,
            role: Role::System,
        }
    }

    pub fn allows(&self, permission: Permission) -> bool {
        use Permission::*;
        match self.role {
            Role::System => true,
            Role::SuperAdmin => true,
            Role::Admin => !matches!(permission, ReviewCredit),
            Role::Operator => matches!(
                permission,
                ReviewOrders | ReviewWithdrawals | RunSweeps
            ),
        }
    }

    pub fn require(&self, permission: Permission) -> Result<(), AccessError> {
        if self.allows(permission) {
            Ok(())
        } else {
            Err(AccessError::Forbidden {
                role: self.role,
                permission,
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    #[error("Role {role} lacks permission {permission}")]
    Forbidden { role: Role, permission: Permission },

    #[error("User {user} does not own {resource}")]
    NotOwner { user: u64, resource: String },
}
