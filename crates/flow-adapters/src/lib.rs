//! flow-adapters: steps de join contra sistemas externos y tabla en
//! memoria.
//!
//! Implementan el protocolo `JobHandler` de `flow-core` sobre los drivers
//! concurrentes: `SendToHttp` (cliente reqwest compartido),
//! `JoinWithTable` (contrato `Table`) y `JoinWithKvTable` (driver crudo
//! con semántica por clase de status). `InMemoryTable` cubre estado por
//! clave y joins locales.

pub mod memory;
pub mod steps;

pub use memory::InMemoryTable;
pub use steps::{split_path, HttpJoin, HttpRequest, HttpResponse, JoinFn, JoinWithKvTable, JoinWithTable, KeyExtractor,
                KvDriver, KvJoin, KvResponse, SendToHttp, TableJoin, TableRef};
