use lettre::Address;

/// Parsed the way the mailer parses recipients, plus a dotted domain.
fn deliverable(value: &str) -> bool {
    value
        .parse::<Address>()
        .is_ok_and(|addr| addr.domain().contains('.'))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    NotEmpty,
    NoWhitespace,
    Email,
    /// Letters only (any script).
    Alpha,
    MinLength(usize),
}

impl Rule {
    fn check(self, value: &str) -> bool {
        match self {
            Rule::NotEmpty => !value.trim().is_empty(),
            Rule::NoWhitespace => !value.chars().any(char::is_whitespace),
            Rule::Email => deliverable(value),
            Rule::Alpha => value.chars().all(char::is_alphabetic),
            Rule::MinLength(min) => value.chars().count() >= min,
        }
    }

    fn message(self, label: &str) -> String {
        match self {
            Rule::NotEmpty => format!("{label} must not be empty"),
            Rule::NoWhitespace => format!("{label} must not contain whitespace"),
            Rule::Email => format!("{label} must be a valid email address"),
            Rule::Alpha => format!("{label} must contain only letters"),
            Rule::MinLength(min) => format!("{label} must be at least {min} characters long"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// "password_repeat" -> "Password repeat"
fn label(field: &str) -> String {
    let spaced = field.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Collects the first failing rule of each field.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(&mut self, field: &'static str, value: &str, rules: &[Rule]) -> &mut Self {
        if let Some(rule) = rules.iter().find(|r| !r.check(value)) {
            self.errors.push(FieldError {
                field,
                message: rule.message(&label(field)),
            });
        }
        self
    }

    /// Records a failure found outside the declarative rules, e.g. a taken username.
    pub fn reject(&mut self, field: &'static str, message: impl Into<String>) -> &mut Self {
        if !self.has_error(field) {
            self.errors.push(FieldError {
                field,
                message: message.into(),
            });
        }
        self
    }

    pub fn has_error(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }

    pub fn failed(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn into_errors(self) -> Vec<FieldError> {
        self.errors
    }
}
