// Failure classification for dispatch errors
//
// A pure function over the error's string representation. Retryable means
// the condition is expected to resolve on its own (a dependent provider not
// yet registered, a connection blip); non-retryable means the request will
// never succeed as submitted and retrying only burns budget.

/// Classification of a dispatch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    NonRetryable,
}

struct Rule {
    needle: &'static str,
    class: ErrorClass,
}

// Ordered, first match wins. Non-retryable rules come first so a message
// like "validation error: connection field missing" stays terminal.
const RULES: &[Rule] = &[
    Rule { needle: "validation", class: ErrorClass::NonRetryable },
    Rule { needle: "invalid", class: ErrorClass::NonRetryable },
    Rule { needle: "malformed", class: ErrorClass::NonRetryable },
    Rule { needle: "forbidden", class: ErrorClass::NonRetryable },
    Rule { needle: "unauthorized", class: ErrorClass::NonRetryable },
    Rule { needle: "authorization", class: ErrorClass::NonRetryable },
    Rule { needle: "unsupported", class: ErrorClass::NonRetryable },
    Rule { needle: "not supported", class: ErrorClass::NonRetryable },
    Rule { needle: "not registered", class: ErrorClass::Retryable },
    Rule { needle: "service unavailable", class: ErrorClass::Retryable },
    Rule { needle: "unavailable", class: ErrorClass::Retryable },
    Rule { needle: "timed out", class: ErrorClass::Retryable },
    Rule { needle: "timeout", class: ErrorClass::Retryable },
    Rule { needle: "connection", class: ErrorClass::Retryable },
    Rule { needle: "busy", class: ErrorClass::Retryable },
    Rule { needle: "not ready", class: ErrorClass::Retryable },
    Rule { needle: "temporarily", class: ErrorClass::Retryable },
];

/// Classify a dispatch failure by its message.
///
/// Unknown errors default to retryable: they burn the bounded attempt
/// budget and then dead-letter, whereas a transient error misread as
/// permanent would drop work that could have self-healed.
pub fn classify(error: &str) -> ErrorClass {
    let lowered = error.to_lowercase();
    for rule in RULES {
        if lowered.contains(rule.needle) {
            return rule.class;
        }
    }
    ErrorClass::Retryable
}

pub fn is_retryable(error: &str) -> bool {
    classify(error) == ErrorClass::Retryable
}
