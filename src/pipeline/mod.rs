//! An ordered chain of [`Middleware`]s over a per-operation [`PipeContext`].
//! Check out [`Pipeline`] as a starting point.
mod context;
mod error;
mod middleware;

pub use context::PipeContext;
pub use error::PipeError;
pub use middleware::{Middleware, Next};

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// An immutable, reusable chain of middlewares.
///
/// Every [`Pipeline::invoke`] gets its own fresh [`PipeContext`], so a single pipeline can serve
/// any number of concurrent operations.
///
/// # Example
///
/// ```rust
/// use carrot_pipe::pipeline::{Middleware, Next, PipeContext, PipeError, Pipeline};
/// use tokio_util::sync::CancellationToken;
///
/// struct Greeting;
///
/// struct Greet;
///
/// #[async_trait::async_trait]
/// impl Middleware for Greet {
///     async fn handle(&self, context: &mut PipeContext, next: Next<'_>) -> Result<(), PipeError> {
///         context.insert(Greeting);
///         next.run(context).await
///     }
/// }
///
/// # async fn example() -> Result<(), PipeError> {
/// let pipeline = Pipeline::builder().with_middleware(Greet).build();
/// let context = pipeline.invoke(|_| {}, &CancellationToken::new()).await?;
/// assert!(context.contains::<Greeting>());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Pipeline {
    middleware_chain: Vec<Arc<dyn Middleware>>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder {
            middleware_chain: vec![],
        }
    }

    /// Run the whole chain against a fresh context.
    ///
    /// `seed` populates the context before the first stage runs. The final context is returned
    /// so that the caller can pick up what the stages produced.
    pub async fn invoke<S>(
        &self,
        seed: S,
        cancellation: &CancellationToken,
    ) -> Result<PipeContext, PipeError>
    where
        S: FnOnce(&mut PipeContext) + Send,
    {
        let mut context = PipeContext::new();
        seed(&mut context);

        let next = Next {
            next_middleware: self.middleware_chain.as_slice(),
            cancellation,
        };
        next.run(&mut context).await?;
        Ok(context)
    }

    /// The number of stages in the chain.
    pub fn len(&self) -> usize {
        self.middleware_chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middleware_chain.is_empty()
    }
}

/// A builder for [`Pipeline`].
///
/// Use [`Pipeline::builder`] as entrypoint.
pub struct PipelineBuilder {
    middleware_chain: Vec<Arc<dyn Middleware>>,
}

impl PipelineBuilder {
    /// Middlewares are executed in the order they are registered: the first registered
    /// middleware executes first on the way in and last on the way out.
    #[must_use]
    pub fn with_middleware<M: Middleware>(self, middleware: M) -> Self {
        self.with_dyn_middleware(Arc::new(middleware))
    }

    /// Append dynamic middleware logic, see [`PipelineBuilder::with_middleware`].
    #[must_use]
    pub fn with_dyn_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware_chain.push(middleware);
        self
    }

    /// Append multiple dynamic middlewares, see [`PipelineBuilder::with_middleware`].
    #[must_use]
    pub fn with_middlewares<I>(mut self, middlewares: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Middleware>>,
    {
        self.middleware_chain.extend(middlewares);
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            middleware_chain: self.middleware_chain,
        }
    }
}
