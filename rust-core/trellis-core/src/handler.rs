//! # Handlers and Parameter Resolution
//!
//! Handlers declare what they need by parameter type. Each parameter type
//! implements [`FromDispatch`]:
//!
//! - primitives consume the next path capture and coerce it
//! - `Option<primitive>` does the same, yielding `None` once captures run out
//! - [`Request`] receives the request
//! - [`Validated<R>`] receives the request after `R`'s rules passed
//! - `Arc<T>` for an [`Injectable`] `T` is resolved through the container
//! - [`Inject<T>`] is resolved from an explicit binding (works for `dyn Trait`)
//!
//! Only the first request kind a handler declares is validated.

use crate::container::{Container, Injectable};
use crate::error::{Error, Result};
use crate::reply::{IntoOutcome, Outcome};
use crate::request::{FormRequest, Request, Validated};
use crate::types::FromCapture;
use crate::validation::Validator;
use std::any::{type_name, TypeId};
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

/// Boxed, sendable future
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Validation rules attached to a request kind
#[derive(Debug, Clone, Copy)]
pub struct RequestKind {
    type_id: TypeId,
    name: &'static str,
    rules: &'static [(&'static str, &'static str)],
    messages: &'static [(&'static str, &'static str)],
}

impl RequestKind {
    /// Kind for a [`FormRequest`] type
    #[must_use]
    pub fn of<R: FormRequest>() -> Self {
        Self {
            type_id: TypeId::of::<R>(),
            name: type_name::<R>(),
            rules: R::RULES,
            messages: R::MESSAGES,
        }
    }

    /// Type name of the request kind
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

/// Everything a handler's parameters can be drawn from
pub struct DispatchContext {
    request: Request,
    container: Arc<Container>,
    validator: Validator,
    route: String,
    captures: std::vec::IntoIter<String>,
    consumed: usize,
    validated: Option<TypeId>,
}

impl fmt::Debug for DispatchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchContext")
            .field("route", &self.route)
            .field("consumed", &self.consumed)
            .finish_non_exhaustive()
    }
}

impl DispatchContext {
    /// Context for one matched route
    pub fn new(
        request: Request,
        container: Arc<Container>,
        validator: Validator,
        route: impl Into<String>,
        captures: Vec<String>,
    ) -> Self {
        Self {
            request,
            container,
            validator,
            route: route.into(),
            captures: captures.into_iter(),
            consumed: 0,
            validated: None,
        }
    }

    /// The request being dispatched
    #[must_use]
    pub const fn request(&self) -> &Request {
        &self.request
    }

    /// The service container
    #[must_use]
    pub fn container(&self) -> &Container {
        &self.container
    }

    /// Pattern of the matched route
    #[must_use]
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Take the next unused capture
    pub fn next_capture(&mut self) -> Option<String> {
        let capture = self.captures.next()?;
        self.consumed += 1;
        Some(capture)
    }

    /// Error for a capture-consuming parameter with nothing left to consume
    #[must_use]
    pub fn missing(&self, expected: &'static str) -> Error {
        Error::MissingParameter {
            position: self.consumed,
            expected,
            route: self.route.clone(),
        }
    }

    /// Run `kind`'s rules against the parameter bag
    ///
    /// # Errors
    ///
    /// `Error::Validation` with the collected messages, or a rule/lookup
    /// failure from the validator.
    pub async fn validate(&mut self, kind: Option<RequestKind>) -> Result<()> {
        let Some(kind) = kind else {
            return Ok(());
        };
        debug!(kind = kind.name, route = %self.route, "Validating request");
        self.validator
            .check(self.request.all(), kind.rules, kind.messages)
            .await?;
        self.validated = Some(kind.type_id);
        Ok(())
    }
}

/// A handler parameter that can be produced during dispatch
pub trait FromDispatch: Sized + Send + 'static {
    /// Rules to validate before the handler runs, for request kinds
    fn request_kind() -> Option<RequestKind> {
        None
    }

    /// Produce the value
    ///
    /// # Errors
    ///
    /// `MissingParameter`, `InvalidParameter`, or a container failure.
    fn from_dispatch(cx: &mut DispatchContext) -> Result<Self>;
}

macro_rules! capture_params {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FromDispatch for $ty {
                fn from_dispatch(cx: &mut DispatchContext) -> Result<Self> {
                    let raw = cx
                        .next_capture()
                        .ok_or_else(|| cx.missing(<$ty as FromCapture>::TYPE_NAME))?;
                    <$ty as FromCapture>::from_capture(&raw)
                }
            }

            impl FromDispatch for Option<$ty> {
                fn from_dispatch(cx: &mut DispatchContext) -> Result<Self> {
                    cx.next_capture()
                        .map(|raw| <$ty as FromCapture>::from_capture(&raw))
                        .transpose()
                }
            }
        )*
    };
}

capture_params!(String, i64, i32, u64, u32, usize, f64, f32, bool);

impl FromDispatch for Request {
    fn from_dispatch(cx: &mut DispatchContext) -> Result<Self> {
        Ok(cx.request.clone())
    }
}

impl<R: FormRequest> FromDispatch for Validated<R> {
    fn request_kind() -> Option<RequestKind> {
        Some(RequestKind::of::<R>())
    }

    fn from_dispatch(cx: &mut DispatchContext) -> Result<Self> {
        if cx.validated != Some(TypeId::of::<R>()) {
            return Err(Error::InvalidRouteConfiguration {
                pattern: cx.route.clone(),
                reason: format!(
                    "{} is not the first request kind of its handler and was never validated",
                    type_name::<R>()
                ),
            });
        }
        Ok(Validated::new(cx.request.clone()))
    }
}

impl<T: Injectable> FromDispatch for Arc<T> {
    fn from_dispatch(cx: &mut DispatchContext) -> Result<Self> {
        cx.container.resolve::<T>()
    }
}

/// A service taken from an explicit container binding
///
/// Use for trait objects: `Inject<dyn Mailer>`.
pub struct Inject<T: ?Sized>(pub Arc<T>);

impl<T: ?Sized> Deref for Inject<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: ?Sized> fmt::Debug for Inject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Inject").field(&type_name::<T>()).finish()
    }
}

impl<T: ?Sized + Send + Sync + 'static> FromDispatch for Inject<T> {
    fn from_dispatch(cx: &mut DispatchContext) -> Result<Self> {
        cx.container.get::<T>().map(Inject)
    }
}

/// An async function whose parameters are all [`FromDispatch`]
pub trait Handler<Args>: Clone + Send + Sync + 'static {
    /// First request kind among the parameters
    fn request_kind() -> Option<RequestKind>;

    /// Extract every parameter in order and start the call
    ///
    /// # Errors
    ///
    /// The first parameter that cannot be produced.
    fn call(&self, cx: &mut DispatchContext) -> Result<BoxFuture<'static, Result<Outcome>>>;
}

/// A controller method: `fn(Arc<C>, ...)` with [`FromDispatch`] parameters
pub trait ControllerHandler<C, Args>: Clone + Send + Sync + 'static {
    /// First request kind among the parameters after the controller
    fn request_kind() -> Option<RequestKind>;

    /// Extract the remaining parameters and start the call
    ///
    /// # Errors
    ///
    /// The first parameter that cannot be produced.
    fn call(
        &self,
        controller: Arc<C>,
        cx: &mut DispatchContext,
    ) -> Result<BoxFuture<'static, Result<Outcome>>>;
}

macro_rules! impl_handler {
    ($($arg:ident),*) => {
        impl<F, Fut, R, $($arg,)*> Handler<($($arg,)*)> for F
        where
            F: Fn($($arg),*) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future<Output = R> + Send + 'static,
            R: IntoOutcome,
            $($arg: FromDispatch,)*
        {
            fn request_kind() -> Option<RequestKind> {
                None $(.or_else(<$arg as FromDispatch>::request_kind))*
            }

            #[allow(non_snake_case, unused_variables)]
            fn call(
                &self,
                cx: &mut DispatchContext,
            ) -> Result<BoxFuture<'static, Result<Outcome>>> {
                $(let $arg = <$arg as FromDispatch>::from_dispatch(cx)?;)*
                let fut = (self)($($arg),*);
                Ok(Box::pin(async move { fut.await.into_outcome() }))
            }
        }

        impl<C, F, Fut, R, $($arg,)*> ControllerHandler<C, ($($arg,)*)> for F
        where
            C: Send + Sync + 'static,
            F: Fn(Arc<C>, $($arg),*) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future<Output = R> + Send + 'static,
            R: IntoOutcome,
            $($arg: FromDispatch,)*
        {
            fn request_kind() -> Option<RequestKind> {
                None $(.or_else(<$arg as FromDispatch>::request_kind))*
            }

            #[allow(non_snake_case, unused_variables)]
            fn call(
                &self,
                controller: Arc<C>,
                cx: &mut DispatchContext,
            ) -> Result<BoxFuture<'static, Result<Outcome>>> {
                $(let $arg = <$arg as FromDispatch>::from_dispatch(cx)?;)*
                let fut = (self)(controller, $($arg),*);
                Ok(Box::pin(async move { fut.await.into_outcome() }))
            }
        }
    };
}

impl_handler!();
impl_handler!(A1);
impl_handler!(A1, A2);
impl_handler!(A1, A2, A3);
impl_handler!(A1, A2, A3, A4);
impl_handler!(A1, A2, A3, A4, A5);
impl_handler!(A1, A2, A3, A4, A5, A6);

type Run = Arc<dyn Fn(DispatchContext) -> BoxFuture<'static, Result<Outcome>> + Send + Sync>;

/// Type-erased route target
#[derive(Clone)]
pub struct Action {
    label: String,
    run: Run,
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Action").field(&self.label).finish()
    }
}

impl Action {
    /// A free function or closure
    pub fn function<H, Args>(handler: H) -> Self
    where
        H: Handler<Args>,
        Args: 'static,
    {
        let run: Run = Arc::new(move |mut cx: DispatchContext| -> BoxFuture<'static, Result<Outcome>> {
            let handler = handler.clone();
            Box::pin(async move {
                cx.validate(H::request_kind()).await?;
                handler.call(&mut cx)?.await
            })
        });
        Self {
            label: type_name::<H>().to_string(),
            run,
        }
    }

    /// A method on controller `C`, which is resolved through the container
    pub fn controller<C, H, Args>(method: H) -> Self
    where
        C: Injectable,
        H: ControllerHandler<C, Args>,
        Args: 'static,
    {
        let run: Run = Arc::new(move |mut cx: DispatchContext| -> BoxFuture<'static, Result<Outcome>> {
            let method = method.clone();
            Box::pin(async move {
                let controller = cx.container.resolve::<C>()?;
                cx.validate(H::request_kind()).await?;
                method.call(controller, &mut cx)?.await
            })
        });
        Self {
            label: type_name::<C>().to_string(),
            run,
        }
    }

    /// Human-readable target name for logs
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Run the target
    ///
    /// # Errors
    ///
    /// `Error::Validation` when the request kind's rules fail, or any
    /// resolution or handler fault.
    pub fn invoke(&self, cx: DispatchContext) -> BoxFuture<'static, Result<Outcome>> {
        (self.run)(cx)
    }
}
