use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodegenError {
    #[error("SPIR-V generation error: {0}")]
    SpirvError(String),

    #[error("unsupported construct: {0}")]
    Unsupported(String),

    #[error("undefined variable '{0}'")]
    UndefinedVariable(String),

    #[error("program has no 'main' function")]
    MissingMain,

    #[error("module validation error: {0}")]
    Validation(String),

    #[error("SPIR-V builder error: {0}")]
    SpirvBuilderError(#[from] rspirv::dr::Error),
}

pub type Result<T> = std::result::Result<T, CodegenError>;
