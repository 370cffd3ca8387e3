pub mod auth_fetch;
pub mod domain;
pub mod http;
pub mod interceptor;
pub mod mutations;
pub mod ports;
pub mod query;
pub mod reconcile;
pub mod token_store;

pub use auth_fetch::{auth_fetch, is_expiry_message, is_token_expiry, EXPIRY_PHRASES};
pub use domain::{
    AccessToken, ActivityType, NewProject, Project, ProjectActivity, ProjectDataset, ProjectResult,
    ProjectStatus, ProjectUpdate, OPTIMISTIC_ID_PREFIX,
};
pub use http::{ApiRequest, ApiResponse};
pub use interceptor::{ExpiryInterceptor, SessionExpired};
pub use mutations::{DatasetMutations, DeletePlan};
pub use ports::{
    AccessTokenSource, HttpTransport, PortError, PortResult, ProjectService, TokenRefresher,
    SIGN_OUT_PATH,
};
pub use query::{QueryCache, QueryKey};
pub use reconcile::reconcile_datasets;
pub use token_store::{TokenState, TokenStore};
