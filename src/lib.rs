pub mod backend;
pub mod ber;
pub mod config;
pub mod dn;
pub mod entry;
pub mod error;
pub mod filter;
pub mod import;
pub mod ldap_encoder;
pub mod ldap_handler;
pub mod ldap_protocol;
pub mod ldif_reader;
pub mod ldif_writer;
pub mod metrics;
pub mod schema;
pub mod server;

pub use config::Config;
pub use metrics::{run_metrics_server, Metrics};
pub use server::LdapServer;
