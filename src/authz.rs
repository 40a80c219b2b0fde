//! Staff authorization.
//!
//! One resolver answers both "which pages and statistics does this session see" and
//! "may this session run this operation", so navigation and mutation gating can never
//! disagree. Resolution is pure: no I/O, no clock, no globals. The catalog is an
//! immutable value handed in at construction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::FulfillmentError;

/// Named staff capability, one per operational area.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Orders,
    Products,
    Customers,
    Analytics,
    Staff,
}

impl Permission {
    pub const ALL: [Permission; 5] = [Self::Orders, Self::Products, Self::Customers, Self::Analytics, Self::Staff];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Orders => "orders",
            Self::Products => "products",
            Self::Customers => "customers",
            Self::Analytics => "analytics",
            Self::Staff => "staff",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Permission {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL.into_iter().find(|p| p.as_str() == s).ok_or_else(|| format!("unknown permission '{}'", s))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Employee,
}

impl FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "admin" => Ok(Self::Admin),
            "employee" => Ok(Self::Employee),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// The authenticated staff member behind a request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffSession {
    pub role: Role,
    pub permissions: BTreeSet<Permission>,
}

impl StaffSession {
    pub fn new(role: Role, permissions: impl IntoIterator<Item = Permission>) -> Self {
        Self { role, permissions: permissions.into_iter().collect() }
    }

    pub fn admin() -> Self { Self::new(Role::Admin, []) }

    pub fn employee(permissions: impl IntoIterator<Item = Permission>) -> Self { Self::new(Role::Employee, permissions) }

    /// Builds a session from raw grant strings. Names outside the permission catalog are dropped.
    pub fn from_grants<'a>(role: Role, grants: impl IntoIterator<Item = &'a str>) -> Self {
        let permissions = grants
            .into_iter()
            .filter_map(|g| match g.parse::<Permission>() {
                Ok(p) => Some(p),
                Err(e) => {
                    tracing::debug!(error = %e, "ignoring grant outside the permission catalog");
                    None
                }
            });
        Self::new(role, permissions)
    }

    /// Admins implicitly hold every permission.
    pub fn holds(&self, permission: Permission) -> bool {
        self.role == Role::Admin || self.permissions.contains(&permission)
    }
}

/// What a page, statistic or operation requires.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "permission", rename_all = "snake_case")]
pub enum Access {
    Permission(Permission),
    AdminOnly,
}

impl Access {
    pub fn granted_to(&self, role: Role, permissions: &BTreeSet<Permission>) -> bool {
        match (role, self) {
            (Role::Admin, _) => true,
            (Role::Employee, Access::Permission(p)) => permissions.contains(p),
            (Role::Employee, Access::AdminOnly) => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageDescriptor {
    pub id: String,
    pub title: String,
    pub path: String,
    pub access: Access,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatDescriptor {
    pub key: String,
    pub access: Access,
}

/// Ordered operational pages and statistic keys with their access rules.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationCatalog {
    pub pages: Vec<PageDescriptor>,
    pub stats: Vec<StatDescriptor>,
}

impl AuthorizationCatalog {
    pub fn storefront() -> Self {
        use Permission::*;
        let page = |id: &str, title: &str, access: Access| PageDescriptor {
            id: id.into(), title: title.into(), path: format!("/admin/{}", id), access,
        };
        let stat = |key: &str, p: Permission| StatDescriptor { key: key.into(), access: Access::Permission(p) };
        Self {
            pages: vec![
                page("orders", "Orders", Access::Permission(Orders)),
                page("products", "Products", Access::Permission(Products)),
                page("customers", "Customers", Access::Permission(Customers)),
                page("analytics", "Analytics", Access::Permission(Analytics)),
                page("staff", "Staff", Access::Permission(Staff)),
                page("coupons", "Coupons", Access::AdminOnly),
                page("shipping", "Shipping rates", Access::AdminOnly),
            ],
            stats: vec![
                stat("totalOrders", Orders),
                stat("totalProducts", Products),
                stat("totalCustomers", Customers),
                stat("totalRevenue", Analytics),
                stat("totalStaff", Staff),
            ],
        }
    }
}

impl Default for AuthorizationCatalog {
    fn default() -> Self { Self::storefront() }
}

/// Lifecycle operations a staff session may be asked to perform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    ViewOrders,
    UpdateOrderStatus,
    UpdateOrderDetails,
    DeleteOrder,
}

impl Operation {
    pub fn required(&self) -> Access {
        match self {
            Self::ViewOrders | Self::UpdateOrderStatus | Self::UpdateOrderDetails | Self::DeleteOrder => {
                Access::Permission(Permission::Orders)
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ViewOrders => "view orders",
            Self::UpdateOrderStatus => "update order status",
            Self::UpdateOrderDetails => "update order details",
            Self::DeleteOrder => "delete orders",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Authorizer {
    catalog: AuthorizationCatalog,
}

impl Authorizer {
    pub fn new(catalog: AuthorizationCatalog) -> Self { Self { catalog } }

    pub fn catalog(&self) -> &AuthorizationCatalog { &self.catalog }

    /// Pages visible to `(role, permissions)`, in catalog order.
    pub fn resolve_pages(&self, role: Role, permissions: &[Permission]) -> Vec<PageDescriptor> {
        let granted: BTreeSet<Permission> = permissions.iter().copied().collect();
        self.catalog.pages.iter().filter(|p| p.access.granted_to(role, &granted)).cloned().collect()
    }

    pub fn resolve_stats(&self, role: Role, permissions: &[Permission]) -> BTreeSet<String> {
        let granted: BTreeSet<Permission> = permissions.iter().copied().collect();
        self.catalog.stats.iter().filter(|s| s.access.granted_to(role, &granted)).map(|s| s.key.clone()).collect()
    }

    pub fn pages_for(&self, session: &StaffSession) -> Vec<PageDescriptor> {
        self.resolve_pages(session.role, &session.permissions.iter().copied().collect::<Vec<_>>())
    }

    pub fn stats_for(&self, session: &StaffSession) -> BTreeSet<String> {
        self.resolve_stats(session.role, &session.permissions.iter().copied().collect::<Vec<_>>())
    }

    pub fn authorize(&self, session: &StaffSession, operation: Operation) -> Result<(), FulfillmentError> {
        if operation.required().granted_to(session.role, &session.permissions) {
            return Ok(());
        }
        tracing::warn!(role = ?session.role, operation = operation.name(), "operation denied");
        let reason = match operation.required() {
            Access::Permission(p) => format!("missing permission '{}' to {}", p, operation.name()),
            Access::AdminOnly => format!("only admins may {}", operation.name()),
        };
        Err(FulfillmentError::Unauthorized(reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ids(pages: &[PageDescriptor]) -> Vec<&str> { pages.iter().map(|p| p.id.as_str()).collect() }

    #[test]
    fn employee_with_orders_sees_only_orders() {
        let authz = Authorizer::default();
        let pages = authz.resolve_pages(Role::Employee, &[Permission::Orders]);
        assert_eq!(ids(&pages), vec!["orders"]);
        let stats = authz.resolve_stats(Role::Employee, &[Permission::Orders]);
        assert_eq!(stats, BTreeSet::from(["totalOrders".to_string()]));
    }

    #[test]
    fn admin_sees_everything_regardless_of_grants() {
        let authz = Authorizer::default();
        let pages = authz.resolve_pages(Role::Admin, &[]);
        assert_eq!(pages.len(), authz.catalog().pages.len());
        assert!(ids(&pages).contains(&"coupons"));
        assert_eq!(authz.resolve_stats(Role::Admin, &[]).len(), authz.catalog().stats.len());
    }

    #[test]
    fn employee_without_grants_sees_nothing() {
        let authz = Authorizer::default();
        assert!(authz.resolve_pages(Role::Employee, &[]).is_empty());
        assert!(authz.resolve_stats(Role::Employee, &[]).is_empty());
    }

    #[test]
    fn unknown_grants_are_dropped() {
        let session = StaffSession::from_grants(Role::Employee, ["orders", "settings", " analytics "]);
        assert_eq!(session.permissions, BTreeSet::from([Permission::Orders, Permission::Analytics]));
    }

    #[test]
    fn operation_gating() {
        let authz = Authorizer::default();
        assert!(authz.authorize(&StaffSession::admin(), Operation::DeleteOrder).is_ok());
        assert!(authz.authorize(&StaffSession::employee([Permission::Orders]), Operation::UpdateOrderStatus).is_ok());
        let denied = authz.authorize(&StaffSession::employee([Permission::Products]), Operation::UpdateOrderStatus);
        assert!(matches!(denied, Err(FulfillmentError::Unauthorized(_))));
    }

    fn permission_subset() -> impl Strategy<Value = Vec<Permission>> {
        proptest::sample::subsequence(Permission::ALL.to_vec(), 0..=Permission::ALL.len())
    }

    proptest! {
        #[test]
        fn resolution_is_deterministic(perms in permission_subset(), admin in any::<bool>()) {
            let authz = Authorizer::default();
            let role = if admin { Role::Admin } else { Role::Employee };
            prop_assert_eq!(authz.resolve_pages(role, &perms), authz.resolve_pages(role, &perms));
            prop_assert_eq!(authz.resolve_stats(role, &perms), authz.resolve_stats(role, &perms));
        }

        #[test]
        fn employee_visibility_within_grants(perms in permission_subset()) {
            let authz = Authorizer::default();
            for page in authz.resolve_pages(Role::Employee, &perms) {
                match page.access {
                    Access::Permission(p) => prop_assert!(perms.contains(&p)),
                    Access::AdminOnly => prop_assert!(false, "admin-only page leaked: {}", page.id),
                }
            }
            let visible = authz.resolve_stats(Role::Employee, &perms);
            prop_assert_eq!(visible.len(), perms.len());
        }
    }
}
