pub mod http;
pub mod logto;
pub mod turing;

pub use http::ReqwestTransport;
pub use logto::{LogtoAdapter, M2mTokenSource, SessionTokenSource};
pub use turing::TuringApiAdapter;
