use std::path::PathBuf;

/// xacro directives that are recognized but not supported.
pub const UNIMPLEMENTED_DIRECTIVES: &[&str] = &["eval"];

#[derive(Debug, thiserror::Error)]
pub enum XacroError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to access '{path}': {source}")]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("XML error: {0}")]
    Xml(#[from] xmltree::ParseError),

    #[error("XML write error: {0}")]
    XmlWrite(#[from] xmltree::Error),

    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("The root element must expand to exactly one element")]
    InvalidRoot,

    #[error("Include error: {0}")]
    Include(String),

    #[error("Unknown macro: '{0}'")]
    UndefinedMacro(String),

    #[error("Missing parameter '{param}' in macro '{macro_name}'")]
    MissingParameter { macro_name: String, param: String },

    #[error("Missing attribute '{attribute}' in element '{element}'")]
    MissingAttribute { element: String, attribute: String },

    #[error("Undefined property: '{0}'")]
    UndefinedProperty(String),

    #[error("Circular property dependency: {chain}")]
    CircularPropertyDependency { chain: String },

    #[error("Evaluation error in '{expr}': {source}")]
    EvalError {
        expr: String,
        #[source]
        source: crate::eval::EvalError,
    },

    #[error("Undefined argument: '{0}'")]
    UndefinedArgument(String),

    #[error("Unknown extension: $({0} ...)")]
    UnknownExtension(String),

    #[error("Invalid extension '$({0})'")]
    InvalidExtension(String),

    #[error("$({command}) failed: {message}")]
    Extension { command: String, message: String },

    #[error("Unsupported xacro feature: {0}")]
    UnimplementedFeature(String),

    #[error("Unprocessed xacro element <xacro:{0}> left in output")]
    UnprocessedElement(String),

    #[error("Macro recursion limit exceeded: depth {depth} > {limit} (possible infinite loop)")]
    MacroRecursionLimit { depth: usize, limit: usize },

    #[error("Block parameter '{param}' cannot have a default value")]
    BlockParameterWithDefault { param: String },

    #[error("Invalid parameter name: '{param}'")]
    InvalidParameterName { param: String },

    #[error("Unbalanced quote {quote_char} in macro params '{params_str}'")]
    UnbalancedQuote { quote_char: char, params_str: String },

    #[error("Duplicate parameter declaration: '{param}'")]
    DuplicateParamDeclaration { param: String },

    #[error("Missing block parameter '{param}' in macro '{macro_name}'")]
    MissingBlockParameter { macro_name: String, param: String },

    #[error("Unused block in macro '{macro_name}' (provided {extra_count} extra child elements)")]
    UnusedBlock {
        macro_name: String,
        extra_count: usize,
    },

    #[error("Invalid parameter \"{param}\" in call to macro '{macro_name}'")]
    InvalidParameter { macro_name: String, param: String },

    #[error("Block parameter '{param}' cannot be specified as an attribute")]
    BlockParameterAttributeCollision { param: String },

    #[error("Undefined block '{name}'")]
    UndefinedBlock { name: String },

    #[error("Macro '{macro_name}' forwards '{param}' from '^{forward_name}', which is undefined in the calling scope")]
    UndefinedPropertyToForward {
        macro_name: String,
        param: String,
        forward_name: String,
    },

    #[error("Invalid scope '{scope}' for property '{property}' (expected 'parent' or 'global')")]
    InvalidScopeAttribute { property: String, scope: String },

    #[error("Package not found: {0}")]
    PackageNotFound(String),

    #[error("Invalid package manifest '{path}': {reason}")]
    InvalidPackageManifest { path: PathBuf, reason: String },

    #[error("URDF file did not converge after {max_runs} runs.")]
    NotConverged { max_runs: usize },

    #[error("MJCF error: {0}")]
    Mjcf(String),

    #[error("MJCF conversion is unavailable: {0}")]
    MjcfUnavailable(String),

    #[error("MJCF conversion of '{urdf}' failed ({status}): {stderr}")]
    MjcfConversion {
        urdf: PathBuf,
        status: String,
        stderr: String,
    },

    #[error("Failed to generate unique name for {0}.")]
    AssetName(String),
}

impl XacroError {
    pub(crate) fn file_io(
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        XacroError::FileIo {
            path: path.into(),
            source,
        }
    }

    /// Name of the missing package, if this is a package lookup failure.
    pub fn missing_package(&self) -> Option<&str> {
        match self {
            XacroError::PackageNotFound(name) => Some(name),
            _ => None,
        }
    }
}
