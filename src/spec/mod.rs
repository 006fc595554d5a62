pub mod store;
pub mod validator;

pub use store::{SpecError, SpecStore};
pub use validator::{FieldIssue, JsonSchemaValidator, Validator};
