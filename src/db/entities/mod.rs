//! SeaORM entities mapping the panel's relational tables.
//!
//! Each entity lives in its own module; the [`prelude`] re-exports the
//! common aliases for convenient importing.

pub mod admin;
pub mod admin_usage_log;
pub mod node;
pub mod node_user_usage;
pub mod proxy;
pub mod proxy_host;
pub mod service;
pub mod service_admin;
pub mod user;
pub mod user_usage_reset_log;

pub mod prelude {
    pub use super::admin::Entity as Admin;
    pub use super::admin::Model as AdminModel;
    pub use super::admin::ActiveModel as AdminActiveModel;
    pub use super::admin::Column as AdminColumn;

    pub use super::user::Entity as User;
    pub use super::user::Model as UserModel;
    pub use super::user::ActiveModel as UserActiveModel;
    pub use super::user::Column as UserColumn;
    pub use super::user::NextPlan;

    pub use super::node::Entity as Node;
    pub use super::node::Model as NodeModel;
    pub use super::node::ActiveModel as NodeActiveModel;
    pub use super::node::Column as NodeColumn;

    pub use super::service::Entity as Service;
    pub use super::service::Model as ServiceModel;
    pub use super::service::ActiveModel as ServiceActiveModel;
    pub use super::service::Column as ServiceColumn;

    pub use super::service_admin::Entity as ServiceAdmin;
    pub use super::service_admin::Model as ServiceAdminModel;
    pub use super::service_admin::ActiveModel as ServiceAdminActiveModel;
    pub use super::service_admin::Column as ServiceAdminColumn;

    pub use super::proxy::Entity as Proxy;
    pub use super::proxy::Model as ProxyModel;
    pub use super::proxy::ActiveModel as ProxyActiveModel;
    pub use super::proxy::Column as ProxyColumn;

    pub use super::proxy_host::Entity as ProxyHost;
    pub use super::proxy_host::Model as ProxyHostModel;
    pub use super::proxy_host::ActiveModel as ProxyHostActiveModel;
    pub use super::proxy_host::Column as ProxyHostColumn;

    pub use super::node_user_usage::Entity as NodeUserUsage;
    pub use super::node_user_usage::Model as NodeUserUsageModel;
    pub use super::node_user_usage::ActiveModel as NodeUserUsageActiveModel;
    pub use super::node_user_usage::Column as NodeUserUsageColumn;

    pub use super::user_usage_reset_log::Entity as UserUsageResetLog;
    pub use super::user_usage_reset_log::Model as UserUsageResetLogModel;
    pub use super::user_usage_reset_log::ActiveModel as UserUsageResetLogActiveModel;
    pub use super::user_usage_reset_log::Column as UserUsageResetLogColumn;

    pub use super::admin_usage_log::Entity as AdminUsageLog;
    pub use super::admin_usage_log::Model as AdminUsageLogModel;
    pub use super::admin_usage_log::ActiveModel as AdminUsageLogActiveModel;
    pub use super::admin_usage_log::Column as AdminUsageLogColumn;
}
