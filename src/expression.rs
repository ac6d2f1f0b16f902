//! Key expressions
//!
//! A key expression says where a metric fragment comes from. There are three
//! reference forms, one per context root:
//!
//! | Form | Root | Example |
//! |------|------|---------|
//! | `#this.<path>` | parsed descriptor | `#this.operatingSystem.name` |
//! | `@currentRequest.<call>` | current request | `@currentRequest.getHeader('X-Tenant')` |
//! | `@<name>` | component registry | `@region` |
//!
//! References and quoted literals can be concatenated with `+`, which is how
//! the default `name.majorVersion` key is written:
//! `#this.name + '.' + #this.majorVersion`. There are no other operators.
//!
//! Expressions are compiled once into [`KeyExpression`] and evaluated per
//! request against a [`ResolutionContext`].

use crate::components::ComponentLookup;
use crate::descriptor::{Descriptor, Value};
use crate::error::ResolutionError;
use crate::request::HttpRequestView;
use std::fmt;
use std::str::FromStr;

const DESCRIPTOR_PREFIX: &str = "#this.";
const REQUEST_PREFIX: &str = "@currentRequest.";
const COMPONENT_PREFIX: &str = "@";

/// Keys used when none are configured: the client name, and the client name
/// with its major version.
pub const DEFAULT_KEYS: &[&str] = &["#this.name", "#this.name + '.' + #this.majorVersion"];

/// The three roots an expression can address.
#[derive(Clone, Copy)]
pub struct ResolutionContext<'a> {
    /// Parsed client descriptor (`#this`)
    pub descriptor: &'a Descriptor,
    /// Current request (`@currentRequest`)
    pub request: &'a dyn HttpRequestView,
    /// Named components (`@name`)
    pub components: &'a dyn ComponentLookup,
}

impl<'a> ResolutionContext<'a> {
    /// Bundle the three roots.
    pub fn new(
        descriptor: &'a Descriptor,
        request: &'a dyn HttpRequestView,
        components: &'a dyn ComponentLookup,
    ) -> Self {
        Self {
            descriptor,
            request,
            components,
        }
    }
}

/// Request accessors available to `@currentRequest.` keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestAccessor {
    /// `getHeader('Name')`
    Header,
    /// `getParameter('name')`, query-string parameter
    Parameter,
    /// `getMethod()`
    Method,
    /// `getRequestURI()`, path without query
    RequestUri,
    /// `getQueryString()`
    QueryString,
    /// `getScheme()`
    Scheme,
}

impl RequestAccessor {
    fn from_name(name: &str) -> Option<Self> {
        let accessor = match name {
            "getHeader" => Self::Header,
            "getParameter" => Self::Parameter,
            "getMethod" => Self::Method,
            "getRequestURI" => Self::RequestUri,
            "getQueryString" => Self::QueryString,
            "getScheme" => Self::Scheme,
            _ => return None,
        };
        Some(accessor)
    }

    /// Method name as written in expressions.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Header => "getHeader",
            Self::Parameter => "getParameter",
            Self::Method => "getMethod",
            Self::RequestUri => "getRequestURI",
            Self::QueryString => "getQueryString",
            Self::Scheme => "getScheme",
        }
    }

    fn takes_argument(&self) -> bool {
        matches!(self, Self::Header | Self::Parameter)
    }
}

/// One operand of a key expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    /// Attribute path on the descriptor
    Descriptor { path: Vec<String> },
    /// Accessor call on the current request
    Request {
        accessor: RequestAccessor,
        argument: Option<String>,
    },
    /// Named component
    Component { name: String },
    /// Quoted string literal
    Literal(String),
}

/// A compiled key expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyExpression {
    source: String,
    terms: Vec<Term>,
}

impl KeyExpression {
    /// Compile an expression.
    ///
    /// # Errors
    ///
    /// [`ResolutionError::UnsupportedGrammar`] for anything outside the
    /// reference forms, [`ResolutionError::UnknownMethod`] and
    /// [`ResolutionError::InvalidCall`] for bad `@currentRequest.` calls.
    pub fn parse(source: &str) -> Result<Self, ResolutionError> {
        let terms = split_terms(source)?
            .into_iter()
            .map(|term| parse_term(source, term))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            source: source.to_string(),
            terms,
        })
    }

    /// The expression as configured.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Compiled terms, in order.
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    /// Evaluate against `context`, concatenating the term values.
    pub fn evaluate(&self, context: &ResolutionContext<'_>) -> Result<String, ResolutionError> {
        let mut resolved = String::new();
        for term in &self.terms {
            match term {
                Term::Descriptor { path } => {
                    resolve_path(context.descriptor, path, &mut resolved)?;
                }
                Term::Request { accessor, argument } => {
                    resolved.push_str(&resolve_request(
                        context.request,
                        *accessor,
                        argument.as_deref(),
                    )?);
                }
                Term::Component { name } => {
                    let value = context.components.component(name).ok_or_else(|| {
                        ResolutionError::UnknownComponent { name: name.clone() }
                    })?;
                    resolved.push_str(&value);
                }
                Term::Literal(text) => resolved.push_str(text),
            }
        }
        Ok(resolved)
    }
}

impl FromStr for KeyExpression {
    type Err = ResolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for KeyExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Compile and evaluate `expression` in one step.
///
/// ```ignore
/// let context = ResolutionContext::new(&descriptor, &request, &components);
/// assert_eq!(resolve("#this.operatingSystem.name", &context)?, "Windows 7");
/// ```
pub fn resolve(expression: &str, context: &ResolutionContext<'_>) -> Result<String, ResolutionError> {
    KeyExpression::parse(expression)?.evaluate(context)
}

// ============================================================================
// Parsing
// ============================================================================

/// Split on `+` outside of quotes.
fn split_terms(source: &str) -> Result<Vec<&str>, ResolutionError> {
    let mut terms = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in source.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '+') => {
                terms.push(source[start..i].trim());
                start = i + 1;
            }
            (None, _) => {}
        }
    }
    if quote.is_some() {
        return Err(ResolutionError::unsupported(source));
    }
    terms.push(source[start..].trim());

    if terms.iter().any(|term| term.is_empty()) {
        return Err(ResolutionError::unsupported(source));
    }
    Ok(terms)
}

fn parse_term(source: &str, term: &str) -> Result<Term, ResolutionError> {
    if let Some(text) = quoted(term) {
        return Ok(Term::Literal(text.to_string()));
    }

    if let Some(path) = term.strip_prefix(DESCRIPTOR_PREFIX) {
        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        if segments.iter().any(|s| !is_identifier(s)) {
            return Err(ResolutionError::unsupported(source));
        }
        return Ok(Term::Descriptor { path: segments });
    }

    if let Some(call) = term.strip_prefix(REQUEST_PREFIX) {
        return parse_request_call(source, call);
    }

    if let Some(name) = term.strip_prefix(COMPONENT_PREFIX) {
        if name.is_empty() {
            return Err(ResolutionError::unsupported(source));
        }
        return Ok(Term::Component {
            name: name.to_string(),
        });
    }

    Err(ResolutionError::unsupported(source))
}

/// `name('literal')` or `name()`.
fn parse_request_call(source: &str, call: &str) -> Result<Term, ResolutionError> {
    let (name, rest) = call
        .split_once('(')
        .ok_or_else(|| ResolutionError::unsupported(source))?;
    let inner = rest
        .strip_suffix(')')
        .ok_or_else(|| ResolutionError::unsupported(source))?
        .trim();
    if !is_identifier(name) {
        return Err(ResolutionError::unsupported(source));
    }

    let accessor = RequestAccessor::from_name(name).ok_or_else(|| {
        ResolutionError::UnknownMethod {
            method: name.to_string(),
        }
    })?;

    let argument = if inner.is_empty() {
        None
    } else {
        let literal = quoted(inner).ok_or_else(|| {
            ResolutionError::invalid_call(call, "argument must be a single quoted string")
        })?;
        Some(literal.to_string())
    };

    match (accessor.takes_argument(), &argument) {
        (true, None) => Err(ResolutionError::invalid_call(call, "expects one argument")),
        (false, Some(_)) => Err(ResolutionError::invalid_call(call, "takes no arguments")),
        _ => Ok(Term::Request { accessor, argument }),
    }
}

/// Content of a `'...'` or `"..."` literal without inner quotes of the same kind.
fn quoted(term: &str) -> Option<&str> {
    let quote = term.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    let inner = term.strip_prefix(quote)?.strip_suffix(quote)?;
    (!inner.contains(quote)).then_some(inner)
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ============================================================================
// Evaluation
// ============================================================================

fn resolve_path(
    descriptor: &Descriptor,
    path: &[String],
    out: &mut String,
) -> Result<(), ResolutionError> {
    let mut current = Value::Object(descriptor);
    for segment in path {
        let next = match current {
            Value::Object(object) => object.attribute(segment),
            Value::Text(_) => None,
        };
        current = next.ok_or_else(|| ResolutionError::UnknownAttribute {
            path: path.join("."),
            attribute: segment.clone(),
        })?;
    }
    out.push_str(&current.to_string());
    Ok(())
}

fn resolve_request(
    request: &dyn HttpRequestView,
    accessor: RequestAccessor,
    argument: Option<&str>,
) -> Result<String, ResolutionError> {
    let arg = argument.unwrap_or_default();
    let value = match accessor {
        RequestAccessor::Header => request.header(arg),
        RequestAccessor::Parameter => request.parameter(arg),
        RequestAccessor::Method => Some(request.method()),
        RequestAccessor::RequestUri => Some(request.path()),
        RequestAccessor::QueryString => request.query(),
        RequestAccessor::Scheme => request.scheme(),
    };
    value
        .map(str::to_string)
        .ok_or_else(|| ResolutionError::MissingRequestValue {
            call: match argument {
                Some(arg) => format!("{}('{}')", accessor.name(), arg),
                None => format!("{}()", accessor.name()),
            },
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{ComponentRegistry, NoComponents};
    use crate::descriptor::OperatingSystem;
    use axum::http::Request;

    fn chrome() -> Descriptor {
        Descriptor::builder("Chrome")
            .version("41.0.2228.0")
            .operating_system(OperatingSystem::new("Windows 7", "Windows", "6.1"))
            .build()
    }

    fn request() -> Request<()> {
        Request::builder()
            .method("GET")
            .uri("/shop/cart?campaign=spring")
            .header("MyHeader", "MyHeaderValue")
            .body(())
            .unwrap()
    }

    fn eval(expression: &str) -> Result<String, ResolutionError> {
        let descriptor = chrome();
        let request = request();
        let components = ComponentRegistry::builder()
            .component("myBean", "value")
            .build();
        let context = ResolutionContext::new(&descriptor, &request, &components);
        resolve(expression, &context)
    }

    #[test]
    fn test_descriptor_paths() {
        assert_eq!(eval("#this.name").unwrap(), "Chrome");
        assert_eq!(eval("#this.majorVersion").unwrap(), "41");
        assert_eq!(eval("#this.operatingSystem.name").unwrap(), "Windows 7");
        assert_eq!(eval("#this.operatingSystem").unwrap(), "Windows 7");
        assert_eq!(eval("#this.operatingSystemName").unwrap(), "Windows 7");
    }

    #[test]
    fn test_unknown_attribute() {
        assert_eq!(
            eval("#this.browser"),
            Err(ResolutionError::UnknownAttribute {
                path: "browser".to_string(),
                attribute: "browser".to_string(),
            })
        );
        // Attributes are case-sensitive
        assert!(matches!(
            eval("#this.Name"),
            Err(ResolutionError::UnknownAttribute { .. })
        ));
        // Cannot walk into a leaf value
        assert!(matches!(
            eval("#this.name.length"),
            Err(ResolutionError::UnknownAttribute { attribute, .. }) if attribute == "length"
        ));
    }

    #[test]
    fn test_request_calls() {
        assert_eq!(
            eval("@currentRequest.getHeader('MyHeader')").unwrap(),
            "MyHeaderValue"
        );
        assert_eq!(
            eval("@currentRequest.getHeader(\"myheader\")").unwrap(),
            "MyHeaderValue"
        );
        assert_eq!(eval("@currentRequest.getMethod()").unwrap(), "GET");
        assert_eq!(eval("@currentRequest.getRequestURI()").unwrap(), "/shop/cart");
        assert_eq!(
            eval("@currentRequest.getParameter('campaign')").unwrap(),
            "spring"
        );
        assert_eq!(
            eval("@currentRequest.getQueryString()").unwrap(),
            "campaign=spring"
        );
    }

    #[test]
    fn test_request_call_failures() {
        assert_eq!(
            eval("@currentRequest.getHeader('Absent')"),
            Err(ResolutionError::MissingRequestValue {
                call: "getHeader('Absent')".to_string()
            })
        );
        assert!(matches!(
            eval("@currentRequest.getScheme()"),
            Err(ResolutionError::MissingRequestValue { .. })
        ));
        assert_eq!(
            eval("@currentRequest.getCookie('a')"),
            Err(ResolutionError::UnknownMethod {
                method: "getCookie".to_string()
            })
        );
        assert!(matches!(
            eval("@currentRequest.getHeader()"),
            Err(ResolutionError::InvalidCall { .. })
        ));
        assert!(matches!(
            eval("@currentRequest.getMethod('x')"),
            Err(ResolutionError::InvalidCall { .. })
        ));
        assert!(matches!(
            eval("@currentRequest.getHeader(MyHeader)"),
            Err(ResolutionError::InvalidCall { .. })
        ));
        assert!(matches!(
            eval("@currentRequest.getHeader('a', 'b')"),
            Err(ResolutionError::InvalidCall { .. })
        ));
        assert!(matches!(
            eval("@currentRequest.headers"),
            Err(ResolutionError::UnsupportedGrammar { .. })
        ));
    }

    #[test]
    fn test_components() {
        assert_eq!(eval("@myBean").unwrap(), "value");
        assert_eq!(
            eval("@otherBean"),
            Err(ResolutionError::UnknownComponent {
                name: "otherBean".to_string()
            })
        );
    }

    #[test]
    fn test_unsupported_grammar() {
        let rejected = [
            "name",
            "this.name",
            "#this",
            "#this.",
            "#that.name",
            "@",
            "",
            "'open",
            "#this.name +",
        ];
        for expression in rejected {
            assert!(
                matches!(eval(expression), Err(ResolutionError::UnsupportedGrammar { .. })),
                "{expression:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_concatenation() {
        assert_eq!(eval(DEFAULT_KEYS[1]).unwrap(), "Chrome.41");
        assert_eq!(
            eval("#this.name + \" on \" + #this.operatingSystem.family").unwrap(),
            "Chrome on Windows"
        );
        assert_eq!(eval("'a+b' + @myBean").unwrap(), "a+bvalue");
    }

    #[test]
    fn test_compiled_terms() {
        let expr: KeyExpression = "#this.name + '.' + @currentRequest.getHeader('X')"
            .parse()
            .unwrap();
        assert_eq!(
            expr.terms(),
            &[
                Term::Descriptor {
                    path: vec!["name".to_string()]
                },
                Term::Literal(".".to_string()),
                Term::Request {
                    accessor: RequestAccessor::Header,
                    argument: Some("X".to_string()),
                },
            ]
        );
        assert_eq!(expr.to_string(), expr.source());
    }

    #[test]
    fn test_compiled_expression_reused_across_contexts() {
        let expr = KeyExpression::parse("#this.name").unwrap();
        let request = request();
        let firefox = Descriptor::builder("Firefox").build();

        let chrome = chrome();
        let a = ResolutionContext::new(&chrome, &request, &NoComponents);
        let b = ResolutionContext::new(&firefox, &request, &NoComponents);
        assert_eq!(expr.evaluate(&a).unwrap(), "Chrome");
        assert_eq!(expr.evaluate(&b).unwrap(), "Firefox");
    }
}
