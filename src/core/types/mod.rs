//! Core data types for the JMAP wire protocol and the engine's change model.

mod changeset;
mod method;
mod patch;
mod session;

pub use changeset::{
    make_copy_create, make_set_request, ChangeSet, CreateBucket, DestroyBucket, SetRequest,
    UpdateBucket,
};
pub use method::{MethodCall, MethodResponse, RequestEnvelope, ResponseEnvelope, ResultReference};
pub use patch::{
    apply_patch, decode_pointer_component, encode_pointer_component, is_valid_patch, make_patches,
    PatchMap,
};
pub use session::{Session, CORE_CAPABILITY, MAIL_CAPABILITY};
