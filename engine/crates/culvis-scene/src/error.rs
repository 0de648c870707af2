pub type SceneResult<T> = Result<T, SceneError>;

#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("effect template `{0}` not found")]
    MissingTemplate(String),

    #[error("material `{0}` not found")]
    MissingMaterial(String),

    #[error("effect template `{0}` already exists")]
    DuplicateTemplate(String),
}
