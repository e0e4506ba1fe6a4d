//! Language descriptors for compilation and execution
//!
//! Every supported language is a variant of [`Language`]. Its descriptor holds
//! argv templates (never shell strings) for the optional compile step and the
//! run step. Ids follow the remote judge's numbering so the same id works for
//! both backends.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;

/// Placeholder replaced by the source file name in argv templates
const SOURCE_PLACEHOLDER: &str = "{source}";
/// Placeholder replaced by the Java main class name in argv templates
const CLASS_PLACEHOLDER: &str = "{class}";

/// Class name used when a Java source has no `public class` declaration
pub const JAVA_FALLBACK_CLASS: &str = "Main";

/// Supported programming languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    C,
    Cpp,
    Go,
    Java,
    JavaScript,
    Python,
    Ruby,
    Rust,
}

/// Static description of how to build and run one language
#[derive(Debug)]
pub struct LanguageDescriptor {
    /// Canonical id, shared with the remote judge
    pub id: u32,
    /// Display name
    pub name: &'static str,
    /// Source file extension without the dot
    pub extension: &'static str,
    /// Compile argv template (None for interpreted languages)
    pub compile: Option<&'static [&'static str]>,
    /// Run argv template
    pub run: &'static [&'static str],
    /// Wall-clock bound for the run step in local mode
    pub timeout: Duration,
}

static C: LanguageDescriptor = LanguageDescriptor {
    id: 50,
    name: "c",
    extension: "c",
    compile: Some(&["gcc", "-O2", "-std=c11", "-o", "main", "{source}", "-lm"]),
    run: &["./main"],
    timeout: Duration::from_secs(10),
};

static CPP: LanguageDescriptor = LanguageDescriptor {
    id: 54,
    name: "cpp",
    extension: "cpp",
    compile: Some(&["g++", "-O2", "-std=c++17", "-o", "main", "{source}"]),
    run: &["./main"],
    timeout: Duration::from_secs(10),
};

static GO: LanguageDescriptor = LanguageDescriptor {
    id: 60,
    name: "go",
    extension: "go",
    compile: Some(&["go", "build", "-o", "main", "{source}"]),
    run: &["./main"],
    timeout: Duration::from_secs(10),
};

static JAVA: LanguageDescriptor = LanguageDescriptor {
    id: 62,
    name: "java",
    extension: "java",
    compile: Some(&["javac", "{source}"]),
    run: &["java", "-cp", ".", "{class}"],
    timeout: Duration::from_secs(15),
};

static JAVASCRIPT: LanguageDescriptor = LanguageDescriptor {
    id: 63,
    name: "javascript",
    extension: "js",
    compile: None,
    run: &["node", "{source}"],
    timeout: Duration::from_secs(10),
};

static PYTHON: LanguageDescriptor = LanguageDescriptor {
    id: 71,
    name: "python",
    extension: "py",
    compile: None,
    run: &["python3", "{source}"],
    timeout: Duration::from_secs(10),
};

static RUBY: LanguageDescriptor = LanguageDescriptor {
    id: 72,
    name: "ruby",
    extension: "rb",
    compile: None,
    run: &["ruby", "{source}"],
    timeout: Duration::from_secs(10),
};

static RUST: LanguageDescriptor = LanguageDescriptor {
    id: 73,
    name: "rust",
    extension: "rs",
    compile: Some(&["rustc", "-O", "-o", "main", "{source}"]),
    run: &["./main"],
    timeout: Duration::from_secs(10),
};

/// Free-form names accepted by `resolve_language_id`
const ALIASES: &[(&str, Language)] = &[
    ("c", Language::C),
    ("gcc", Language::C),
    ("cpp", Language::Cpp),
    ("c++", Language::Cpp),
    ("cplusplus", Language::Cpp),
    ("g++", Language::Cpp),
    ("go", Language::Go),
    ("golang", Language::Go),
    ("java", Language::Java),
    ("javascript", Language::JavaScript),
    ("js", Language::JavaScript),
    ("node", Language::JavaScript),
    ("nodejs", Language::JavaScript),
    ("python", Language::Python),
    ("python3", Language::Python),
    ("py", Language::Python),
    ("ruby", Language::Ruby),
    ("rb", Language::Ruby),
    ("rust", Language::Rust),
    ("rs", Language::Rust),
];

impl Language {
    pub const ALL: [Language; 8] = [
        Language::C,
        Language::Cpp,
        Language::Go,
        Language::Java,
        Language::JavaScript,
        Language::Python,
        Language::Ruby,
        Language::Rust,
    ];

    pub fn descriptor(self) -> &'static LanguageDescriptor {
        match self {
            Language::C => &C,
            Language::Cpp => &CPP,
            Language::Go => &GO,
            Language::Java => &JAVA,
            Language::JavaScript => &JAVASCRIPT,
            Language::Python => &PYTHON,
            Language::Ruby => &RUBY,
            Language::Rust => &RUST,
        }
    }

    pub fn id(self) -> u32 {
        self.descriptor().id
    }

    pub fn from_id(id: u32) -> Option<Language> {
        Language::ALL.into_iter().find(|lang| lang.id() == id)
    }

    /// Name of the source file this language expects for `source_code`
    pub fn source_file_name(self, source_code: &str) -> String {
        match self {
            Language::Java => format!("{}.java", java_class_name(source_code)),
            _ => format!("main.{}", self.descriptor().extension),
        }
    }

    /// Render the compile argv, if this language has a compile step
    pub fn compile_command(self, source_code: &str) -> Option<Vec<String>> {
        self.descriptor()
            .compile
            .map(|template| self.render(template, source_code))
    }

    /// Render the run argv
    pub fn run_command(self, source_code: &str) -> Vec<String> {
        self.render(self.descriptor().run, source_code)
    }

    fn render(self, template: &[&str], source_code: &str) -> Vec<String> {
        let source_file = self.source_file_name(source_code);
        let class_name = java_class_name(source_code);
        template
            .iter()
            .map(|arg| {
                arg.replace(SOURCE_PLACEHOLDER, &source_file)
                    .replace(CLASS_PLACEHOLDER, &class_name)
            })
            .collect()
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.descriptor().name)
    }
}

/// Resolve a free-form language name (or numeric id) to its canonical id.
///
/// Matching trims whitespace and ignores case. Unknown names yield `None`.
pub fn resolve_language_id(name: &str) -> Option<u32> {
    resolve_language(name).map(Language::id)
}

pub fn resolve_language(name: &str) -> Option<Language> {
    let key = name.trim().to_lowercase();
    if let Ok(id) = key.parse::<u32>() {
        return Language::from_id(id);
    }
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, lang)| *lang)
}

/// Get all supported language names
pub fn supported_languages() -> Vec<&'static str> {
    Language::ALL.iter().map(|lang| lang.descriptor().name).collect()
}

/// Extract the `public class` name from Java source, falling back to `Main`
pub fn java_class_name(source_code: &str) -> String {
    static PUBLIC_CLASS: OnceLock<Regex> = OnceLock::new();
    let re = PUBLIC_CLASS.get_or_init(|| {
        Regex::new(r"public\s+(?:(?:final|abstract)\s+)*class\s+([A-Za-z_$][A-Za-z0-9_$]*)")
            .expect("static regex is valid")
    });

    re.captures(source_code)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| JAVA_FALLBACK_CLASS.to_string())
}
