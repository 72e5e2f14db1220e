//! Common constants used throughout stpl.

/// Supported configuration file names
pub const CONFIG_FILES: [&str; 3] = ["stpl.json", "stpl.yml", "stpl.yaml"];

/// Extensions tried after the bare template name when searching directories
pub const TEMPLATE_EXTENSIONS: [&str; 2] = [".tpl", ".stpl"];

/// Chunk size used by buffered rendering unless configured otherwise
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Marks a template line as an embedded statement
pub const CODE_LINE_PREFIX: &str = "%";

/// Opens an inline code region
pub const LITERAL_OPEN: &str = "<%";

/// Closes an inline code region
pub const LITERAL_CLOSE: &str = "%>";

/// Opens a variable substitution
pub const VARIABLE_OPEN: &str = "{{";

/// Closes a variable substitution
pub const VARIABLE_CLOSE: &str = "}}";

/// Keywords that open an indented suite
pub const INDENT_TOKENS: [&str; 6] = ["class", "def", "with", "if", "for", "while"];

/// Keywords that close a suite and open a sibling one
pub const REDENT_TOKENS: [&str; 4] = ["else", "elif", "except", "finally"];

/// Width of one indentation level in the compiled listing
pub const TAB_WIDTH: usize = 4;

/// Nested delegations allowed in a single render
pub const MAX_RECURSION: usize = 256;
