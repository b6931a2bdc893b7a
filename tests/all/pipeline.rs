use carrot_pipe::pipeline::{Middleware, Next, PipeContext, PipeError, Pipeline};
use futures_util::future::BoxFuture;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Records the order in which stages see the operation, on the way in and on the way out.
#[derive(Default)]
struct Trail(Vec<String>);

struct Recording(&'static str);

#[async_trait::async_trait]
impl Middleware for Recording {
    async fn handle(&self, context: &mut PipeContext, next: Next<'_>) -> Result<(), PipeError> {
        trail(context).push(format!("{} in", self.0));
        next.run(context).await?;
        trail(context).push(format!("{} out", self.0));
        Ok(())
    }
}

fn trail(context: &mut PipeContext) -> &mut Vec<String> {
    if !context.contains::<Trail>() {
        context.insert(Trail::default());
    }
    &mut context.get_mut::<Trail>().unwrap().0
}

#[derive(Clone, Default)]
struct Counting(Arc<AtomicUsize>);

#[async_trait::async_trait]
impl Middleware for Counting {
    async fn handle(&self, context: &mut PipeContext, next: Next<'_>) -> Result<(), PipeError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        next.run(context).await
    }
}

struct ShortCircuit;

#[async_trait::async_trait]
impl Middleware for ShortCircuit {
    async fn handle(&self, _context: &mut PipeContext, _next: Next<'_>) -> Result<(), PipeError> {
        Ok(())
    }
}

struct Failing;

#[async_trait::async_trait]
impl Middleware for Failing {
    async fn handle(&self, _context: &mut PipeContext, _next: Next<'_>) -> Result<(), PipeError> {
        Err(PipeError::Stage(anyhow::anyhow!("Boom")))
    }
}

struct CancelDownstream;

#[async_trait::async_trait]
impl Middleware for CancelDownstream {
    async fn handle(&self, context: &mut PipeContext, next: Next<'_>) -> Result<(), PipeError> {
        next.cancellation().cancel();
        next.run(context).await
    }
}

#[tokio::test]
async fn stages_run_in_registration_order() {
    let pipeline = Pipeline::builder()
        .with_middleware(Recording("first"))
        .with_middleware(Recording("second"))
        .build();

    let mut context = pipeline
        .invoke(|_| {}, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        vec!["first in", "second in", "second out", "first out"],
        *trail(&mut context)
    );
}

#[tokio::test]
async fn the_seed_runs_before_the_first_stage() {
    struct Seeded(u32);

    fn double<'a>(
        context: &'a mut PipeContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<(), PipeError>> {
        Box::pin(async move {
            let seeded = context.require::<Seeded>()?.0;
            context.insert(seeded * 2);
            next.run(context).await
        })
    }

    let pipeline = Pipeline::builder().with_middleware(double).build();

    let context = pipeline
        .invoke(
            |context| {
                context.insert(Seeded(21));
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(Some(&42), context.get::<u32>());
}

#[tokio::test]
async fn a_stage_can_short_circuit_the_rest_of_the_chain() {
    let downstream = Counting::default();
    let pipeline = Pipeline::builder()
        .with_middleware(ShortCircuit)
        .with_middleware(downstream.clone())
        .build();

    pipeline
        .invoke(|_| {}, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(0, downstream.0.load(Ordering::SeqCst));
}

#[tokio::test]
async fn a_failing_stage_aborts_the_rest_of_the_chain() {
    let upstream = Counting::default();
    let downstream = Counting::default();
    let pipeline = Pipeline::builder()
        .with_middleware(upstream.clone())
        .with_middleware(Failing)
        .with_middleware(downstream.clone())
        .build();

    let error = pipeline
        .invoke(|_| {}, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(error, PipeError::Stage(_)));
    assert_eq!(1, upstream.0.load(Ordering::SeqCst));
    assert_eq!(0, downstream.0.load(Ordering::SeqCst));
}

#[tokio::test]
async fn a_cancelled_pipeline_does_not_start() {
    let stage = Counting::default();
    let pipeline = Pipeline::builder().with_middleware(stage.clone()).build();
    let cancellation = CancellationToken::new();
    cancellation.cancel();

    let error = pipeline.invoke(|_| {}, &cancellation).await.unwrap_err();

    assert!(matches!(error, PipeError::Cancelled));
    assert_eq!(0, stage.0.load(Ordering::SeqCst));
}

#[tokio::test]
async fn cancellation_stops_the_chain_at_the_next_stage() {
    let downstream = Counting::default();
    let pipeline = Pipeline::builder()
        .with_middleware(CancelDownstream)
        .with_middleware(downstream.clone())
        .build();

    let error = pipeline
        .invoke(|_| {}, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(error, PipeError::Cancelled));
    assert_eq!(0, downstream.0.load(Ordering::SeqCst));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_invocations_get_their_own_context() {
    struct Id(usize);

    fn echo<'a>(
        context: &'a mut PipeContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<(), PipeError>> {
        Box::pin(async move {
            let id = context.require::<Id>()?.0;
            tokio::task::yield_now().await;
            context.insert(id.to_string());
            next.run(context).await
        })
    }

    let pipeline = Pipeline::builder().with_middleware(echo).build();

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                let context = pipeline
                    .invoke(
                        move |context| {
                            context.insert(Id(i));
                        },
                        &CancellationToken::new(),
                    )
                    .await
                    .unwrap();
                (i, context.get::<String>().cloned())
            })
        })
        .collect();

    for handle in handles {
        let (i, echoed) = handle.await.unwrap();
        assert_eq!(Some(i.to_string()), echoed);
    }
}
