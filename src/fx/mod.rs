//! Screen-space effect programs, instances and the chain that runs them.

pub mod backend;
pub mod builtin;
pub mod chain;
pub mod error;
pub mod instance;
pub mod param;
pub mod program;
pub mod uniform;

pub use backend::Backend;
pub use chain::{ApplyOutcome, EffectChain};
pub use error::{ChainStateError, CompileError, EffectError, ParameterError, PassError};
pub use instance::{EffectId, EffectInstance, FrameContext, ParamHandle};
pub use param::{ParamDecl, ParamSchema, ParamType, ParamValue};
pub use program::{ProgramDesc, ShaderProgramResource};
