pub mod common;
pub mod patchers;
pub mod templating;

pub use common::{
    DEFAULTING_ANNOTATION, FIELD_MANAGER, format_gvk, gvk_of, owner_reference, parent_labels,
};
pub use patchers::{
    ChildResourcePatcher, ChildResourcePatcherChain, DefaultingAnnotationRemover, LabelPropagator,
    NamespacePatcher, OwnerReferenceAdder, ParentLabelSetAdder, PatchError,
};
pub use templating::{InlineResourcesEngine, NopTemplatingEngine, TemplatingEngine, TemplatingError};
