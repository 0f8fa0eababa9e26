use snafu::Snafu;

#[derive(Debug, Snafu)]
pub struct Error(OpaqueError);
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub(crate) enum OpaqueError {
    #[snafu(display(
        "Invalid name '{}': names must be 1-{} lowercase alphanumeric characters or '-', starting and ending with an alphanumeric character",
        name,
        max
    ))]
    InvalidName { name: String, max: usize },

    #[snafu(display(
        "Invalid name '{}': the namespace already exists for another purpose and cannot be used by a test",
        name
    ))]
    ReservedName { name: String },
}
