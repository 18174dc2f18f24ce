//! C4 — Task Flow: an ordered list of named, revertible steps sharing a
//! mutable result map (spec.md §4.3, §9).
//!
//! Used for every multi-object write where ordering matters: Content
//! creation, the class-swap protocol, and the Volume-Modify fan-out. Revert
//! is best-effort — it never fails the overall `Run`, only logs.

use std::future::Future;
use std::pin::Pin;

use serde_json::{Map, Value};

use crate::error::{Error, Result};

pub type StepResult = Result<Option<Value>>;

type ForwardFn<Ctx> =
    Box<dyn for<'r> Fn(&'r Ctx, &'r Map<String, Value>) -> Pin<Box<dyn Future<Output = StepResult> + 'r>>>;
type RevertFn<Ctx> =
    Box<dyn for<'r> Fn(&'r Ctx, &'r Map<String, Value>) -> Pin<Box<dyn Future<Output = ()> + 'r>>>;

/// One named step: `forward` produces a delta merged into the shared result
/// map; `revert` is best-effort compensation run in reverse order on error.
pub struct Step<Ctx> {
    pub name: &'static str,
    forward: ForwardFn<Ctx>,
    revert: Option<RevertFn<Ctx>>,
}

impl<Ctx> Step<Ctx> {
    pub fn new<F, Fut>(name: &'static str, forward: F) -> Self
    where
        F: for<'r> Fn(&'r Ctx, &'r Map<String, Value>) -> Fut + 'static,
        Fut: Future<Output = StepResult> + 'static,
    {
        Self {
            name,
            forward: Box::new(move |ctx, result| Box::pin(forward(ctx, result))),
            revert: None,
        }
    }

    pub fn with_revert<R, Fut>(mut self, revert: R) -> Self
    where
        R: for<'r> Fn(&'r Ctx, &'r Map<String, Value>) -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        self.revert = Some(Box::new(move |ctx, result| Box::pin(revert(ctx, result))));
        self
    }
}

/// A pipeline of `Step`s run in order against a shared context and result map.
pub struct TaskFlow<Ctx> {
    steps: Vec<Step<Ctx>>,
}

impl<Ctx> TaskFlow<Ctx> {
    pub fn new(steps: Vec<Step<Ctx>>) -> Self {
        Self { steps }
    }

    /// Run every step forward in order, merging each `deltaResult` into the
    /// shared map before invoking the next step. On the first error, revert
    /// every already-succeeded step in reverse order (logging, never
    /// failing) before returning the original error.
    pub async fn run(&self, ctx: &Ctx, params: Map<String, Value>) -> Result<Map<String, Value>> {
        let mut result = params;
        let mut succeeded: Vec<&'static str> = Vec::with_capacity(self.steps.len());

        for step in &self.steps {
            match (step.forward)(ctx, &result).await {
                Ok(Some(Value::Object(delta))) => {
                    result.extend(delta);
                    succeeded.push(step.name);
                }
                Ok(Some(_)) | Ok(None) => {
                    succeeded.push(step.name);
                }
                Err(err) => {
                    self.revert(ctx, &result, &succeeded).await;
                    return Err(Error::TaskFlow {
                        step: step.name.to_string(),
                        source: Box::new(err),
                    });
                }
            }
        }

        Ok(result)
    }

    async fn revert(&self, ctx: &Ctx, result: &Map<String, Value>, succeeded: &[&'static str]) {
        for name in succeeded.iter().rev() {
            if let Some(step) = self.steps.iter().find(|s| &s.name == name) {
                if let Some(revert) = &step.revert {
                    tracing::info!(step = *name, "reverting task flow step");
                    (revert)(ctx, result).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Ctx {
        log: Mutex<Vec<&'static str>>,
        fail_at: AtomicUsize,
    }

    fn step_ok(name: &'static str) -> Step<Ctx> {
        Step::new(name, move |ctx: &Ctx, _result| {
            ctx.log.lock().unwrap().push(name);
            Box::pin(async move { Ok(None) })
        })
        .with_revert(move |ctx: &Ctx, _result| {
            ctx.log.lock().unwrap().push("revert");
            Box::pin(async move {})
        })
    }

    fn step_fail(name: &'static str) -> Step<Ctx> {
        Step::new(name, move |ctx: &Ctx, _result| {
            let should_fail = ctx.fail_at.load(Ordering::SeqCst) > 0;
            Box::pin(async move {
                if should_fail {
                    Err(Error::Validation("boom".into()))
                } else {
                    Ok(None)
                }
            })
        })
    }

    #[tokio::test]
    async fn runs_steps_in_order() {
        let ctx = Ctx {
            log: Mutex::new(Vec::new()),
            fail_at: AtomicUsize::new(0),
        };
        let flow = TaskFlow::new(vec![step_ok("a"), step_ok("b")]);
        flow.run(&ctx, Map::new()).await.unwrap();
        assert_eq!(*ctx.log.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn reverts_succeeded_steps_in_reverse_on_error() {
        let ctx = Ctx {
            log: Mutex::new(Vec::new()),
            fail_at: AtomicUsize::new(1),
        };
        let flow = TaskFlow::new(vec![step_ok("a"), step_fail("b")]);
        let err = flow.run(&ctx, Map::new()).await.unwrap_err();
        assert!(matches!(err, Error::TaskFlow { .. }));
        assert_eq!(*ctx.log.lock().unwrap(), vec!["a", "revert"]);
    }
}
