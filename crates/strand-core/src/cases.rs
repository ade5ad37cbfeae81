use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::event::TestFailure;
use crate::test::Parameter;

/// Outcome of one invocation of a case body (or wrapper).
pub type CaseResult = Result<(), TestFailure>;

/// A zero-argument asynchronous case body, invocable any number of times.
pub type CaseBody = Arc<dyn Fn() -> BoxFuture<'static, CaseResult> + Send + Sync>;

/// One argument value bound into a case, recorded for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argument {
    /// Name of the formal parameter this value is bound to.
    pub name: String,
    /// Display representation of the value.
    pub value: String,
    /// Stable structural identifier derived from the value; reproducible
    /// across runs for the same argument collection ordering.
    pub id: String,
}

impl Argument {
    pub fn new<T: fmt::Debug>(name: impl Into<String>, value: &T) -> Self {
        let repr = format!("{value:?}");
        let id = stable_id(&repr);
        Self {
            name: name.into(),
            value: repr,
            id,
        }
    }
}

/// Derives a short stable identifier from a value's representation.
pub fn stable_id(repr: &str) -> String {
    let digest = Sha256::digest(repr.as_bytes());
    hex::encode(&digest[..8])
}

/// Identity of one concrete case, derived from its argument identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CaseId(String);

impl CaseId {
    pub fn from_arguments(arguments: &[Argument]) -> Self {
        if arguments.is_empty() {
            return Self("default".to_string());
        }
        let joined: Vec<&str> = arguments.iter().map(|a| a.id.as_str()).collect();
        Self(joined.join("/"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One concrete, argument-bound invocation of a test.
#[derive(Clone)]
pub struct TestCase {
    pub id: CaseId,
    pub arguments: Vec<Argument>,
    body: CaseBody,
}

impl TestCase {
    pub fn new(arguments: Vec<Argument>, body: CaseBody) -> Self {
        let id = CaseId::from_arguments(&arguments);
        Self {
            id,
            arguments,
            body,
        }
    }

    /// Starts one invocation of the case body.
    pub fn invoke(&self) -> BoxFuture<'static, CaseResult> {
        (self.body)()
    }
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("id", &self.id)
            .field("arguments", &self.arguments)
            .finish()
    }
}

/// Produces the concrete cases of a parameterized test.
///
/// Argument collections are materialized exactly once, at construction;
/// [`CaseGenerator::generate`] may be called any number of times without
/// re-materializing them.
#[derive(Clone)]
pub struct CaseGenerator {
    bindings: Vec<(Vec<Argument>, CaseBody)>,
}

impl fmt::Debug for CaseGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaseGenerator")
            .field("cases", &self.bindings.len())
            .finish()
    }
}

fn parameter_name(parameters: &[Parameter], index: usize) -> String {
    parameters
        .get(index)
        .map(|p| p.name.clone())
        .unwrap_or_else(|| format!("arg{index}"))
}

impl CaseGenerator {
    /// A single synthetic case with no bound arguments.
    pub fn single<F, Fut>(body: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CaseResult> + Send + 'static,
    {
        let body: CaseBody = Arc::new(move || Box::pin(body()));
        Self {
            bindings: vec![(Vec::new(), body)],
        }
    }

    /// One case per element of a single collection.
    pub fn from_collection<T, I, F, Fut>(parameters: &[Parameter], elements: I, f: F) -> Self
    where
        T: fmt::Debug + Clone + Send + Sync + 'static,
        I: IntoIterator<Item = T>,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CaseResult> + Send + 'static,
    {
        let f = Arc::new(f);
        let name = parameter_name(parameters, 0);
        let bindings = elements
            .into_iter()
            .map(|element| {
                let arguments = vec![Argument::new(&name, &element)];
                let f = Arc::clone(&f);
                let body: CaseBody =
                    Arc::new(move || Box::pin(f(element.clone())));
                (arguments, body)
            })
            .collect();
        Self { bindings }
    }

    /// Cartesian product of two independent collections; the outer
    /// collection varies slowest.
    pub fn cartesian<A, B, I, J, F, Fut>(
        parameters: &[Parameter],
        outer: I,
        inner: J,
        f: F,
    ) -> Self
    where
        A: fmt::Debug + Clone + Send + Sync + 'static,
        B: fmt::Debug + Clone + Send + Sync + 'static,
        I: IntoIterator<Item = A>,
        J: IntoIterator<Item = B>,
        F: Fn(A, B) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CaseResult> + Send + 'static,
    {
        let f = Arc::new(f);
        let inner: Vec<B> = inner.into_iter().collect();
        let mut bindings = Vec::new();
        for a in outer {
            for b in &inner {
                bindings.push(Self::bind_pair(
                    parameters,
                    a.clone(),
                    b.clone(),
                    Arc::clone(&f),
                ));
            }
        }
        Self { bindings }
    }

    /// One case per element of a sequence of pairs.
    pub fn zipped<A, B, I, F, Fut>(parameters: &[Parameter], pairs: I, f: F) -> Self
    where
        A: fmt::Debug + Clone + Send + Sync + 'static,
        B: fmt::Debug + Clone + Send + Sync + 'static,
        I: IntoIterator<Item = (A, B)>,
        F: Fn(A, B) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CaseResult> + Send + 'static,
    {
        let f = Arc::new(f);
        let bindings = pairs
            .into_iter()
            .map(|(a, b)| Self::bind_pair(parameters, a, b, Arc::clone(&f)))
            .collect();
        Self { bindings }
    }

    /// One case per key/value pair of a key-unique mapping.
    ///
    /// The mapping's iteration order is irrelevant to case identity;
    /// bindings are ordered by case id so generation is deterministic
    /// across runs regardless of the map's internal ordering.
    pub fn from_map<K, V, I, F, Fut>(parameters: &[Parameter], map: I, f: F) -> Self
    where
        K: fmt::Debug + Clone + Send + Sync + 'static,
        V: fmt::Debug + Clone + Send + Sync + 'static,
        I: IntoIterator<Item = (K, V)>,
        F: Fn(K, V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CaseResult> + Send + 'static,
    {
        let f = Arc::new(f);
        let mut bindings: Vec<(Vec<Argument>, CaseBody)> = map
            .into_iter()
            .map(|(k, v)| Self::bind_pair(parameters, k, v, Arc::clone(&f)))
            .collect();
        bindings.sort_by(|(a, _), (b, _)| {
            CaseId::from_arguments(a).cmp(&CaseId::from_arguments(b))
        });
        Self { bindings }
    }

    /// Binds a composite (pair) element.
    ///
    /// With two or more declared parameters each component is recorded as
    /// its own argument value; with fewer, the whole pair is recorded as a
    /// single argument.
    fn bind_pair<A, B, F, Fut>(
        parameters: &[Parameter],
        a: A,
        b: B,
        f: Arc<F>,
    ) -> (Vec<Argument>, CaseBody)
    where
        A: fmt::Debug + Clone + Send + Sync + 'static,
        B: fmt::Debug + Clone + Send + Sync + 'static,
        F: Fn(A, B) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CaseResult> + Send + 'static,
    {
        let arguments = if parameters.len() >= 2 {
            vec![
                Argument::new(parameter_name(parameters, 0), &a),
                Argument::new(parameter_name(parameters, 1), &b),
            ]
        } else {
            let pair = (a.clone(), b.clone());
            vec![Argument::new(parameter_name(parameters, 0), &pair)]
        };
        let body: CaseBody = Arc::new(move || {
            let (a, b) = (a.clone(), b.clone());
            Box::pin(f(a, b))
        });
        (arguments, body)
    }

    /// Lazily yields the cases, in a stable order. Restartable.
    pub fn generate(&self) -> impl Iterator<Item = TestCase> + '_ {
        self.bindings
            .iter()
            .map(|(arguments, body)| TestCase::new(arguments.clone(), Arc::clone(body)))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
