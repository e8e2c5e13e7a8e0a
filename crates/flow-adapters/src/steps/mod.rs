pub mod http;
pub mod kv;
pub mod table;

pub use http::{HttpJoin, HttpRequest, HttpResponse, SendToHttp};
pub use kv::{split_path, JoinWithKvTable, KvDriver, KvJoin, KvResponse};
pub use table::{JoinFn, JoinWithTable, KeyExtractor, TableJoin, TableRef};
