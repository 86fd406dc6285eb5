use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::{trace, warn};

use crate::protocol::ResponseCode;
use crate::{AppError, AppResult};

/// Hooks around a PUT or MERGE writing `path`.
pub trait ReceiveInterceptor: Send + Sync {
    /// `false` aborts the write.
    fn pre_receive(&self, path: &Path) -> AppResult<bool>;
    fn post_receive(&self, path: &Path, error: Option<&AppError>);
}

/// Hooks around a GET or TRANSFER sending `path`.
pub trait TransferInterceptor: Send + Sync {
    /// `false` aborts the transfer.
    fn pre_transfer(&self, path: &Path) -> AppResult<bool>;
    fn post_transfer(&self, path: &Path, error: Option<&AppError>);
}

/// Called once the response of an operation on `path` was delivered, or
/// failed to be.
pub trait GenericInterceptor: Send + Sync {
    fn after_completion(&self, path: &Path, error: Option<&AppError>);
}

#[derive(Clone)]
pub enum Interceptor {
    Receive(Arc<dyn ReceiveInterceptor>),
    Transfer(Arc<dyn TransferInterceptor>),
    Generic(Arc<dyn GenericInterceptor>),
}

impl fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Interceptor::Receive(_) => "Receive",
            Interceptor::Transfer(_) => "Transfer",
            Interceptor::Generic(_) => "Generic",
        };
        write!(f, "Interceptor::{}", kind)
    }
}

/// Interceptors by name, filled once at startup.
#[derive(Debug, Default, Clone)]
pub struct InterceptorRegistry {
    entries: HashMap<String, Interceptor>,
}

impl InterceptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, interceptor: Interceptor) -> &mut Self {
        self.entries.insert(name.into(), interceptor);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Interceptor> {
        self.entries.get(name)
    }

    /// The interceptors requested by name for one operation. Unknown names
    /// are a client error.
    pub fn chain(&self, names: &[String]) -> AppResult<InterceptorChain> {
        let entries = names
            .iter()
            .map(|name| {
                self.entries
                    .get(name)
                    .map(|interceptor| (name.clone(), interceptor.clone()))
                    .ok_or_else(|| {
                        AppError::response(
                            ResponseCode::BadRequest,
                            format!("unknown interceptor {}", name),
                        )
                    })
            })
            .collect::<AppResult<Vec<_>>>()?;
        Ok(InterceptorChain { entries })
    }
}

fn rejected(name: &str, hook: &str, path: &Path) -> AppError {
    AppError::response(
        ResponseCode::InternalServerError,
        format!("interceptor {} rejected {} of {}", name, hook, path.display()),
    )
}

/// Interceptors applying to one operation, each called only for the hooks
/// its kind provides.
#[derive(Debug, Default, Clone)]
pub struct InterceptorChain {
    entries: Vec<(String, Interceptor)>,
}

impl InterceptorChain {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn pre_receive(&self, path: &Path) -> AppResult<()> {
        for (name, interceptor) in &self.entries {
            if let Interceptor::Receive(hook) = interceptor {
                trace!("pre_receive {} on {}", name, path.display());
                if !hook.pre_receive(path)? {
                    return Err(rejected(name, "receive", path));
                }
            }
        }
        Ok(())
    }

    pub fn post_receive(&self, path: &Path, error: Option<&AppError>) {
        for (_, interceptor) in &self.entries {
            if let Interceptor::Receive(hook) = interceptor {
                hook.post_receive(path, error);
            }
        }
    }

    pub fn pre_transfer(&self, path: &Path) -> AppResult<()> {
        for (name, interceptor) in &self.entries {
            if let Interceptor::Transfer(hook) = interceptor {
                trace!("pre_transfer {} on {}", name, path.display());
                if !hook.pre_transfer(path)? {
                    return Err(rejected(name, "transfer", path));
                }
            }
        }
        Ok(())
    }

    pub fn post_transfer(&self, path: &Path, error: Option<&AppError>) {
        for (_, interceptor) in &self.entries {
            if let Interceptor::Transfer(hook) = interceptor {
                hook.post_transfer(path, error);
            }
        }
    }

    pub fn after_completion(&self, path: &Path, error: Option<&AppError>) {
        for (name, interceptor) in &self.entries {
            if let Interceptor::Generic(hook) = interceptor {
                if let Some(error) = error {
                    warn!("{} completes {} after failure: {}", name, path.display(), error);
                }
                hook.after_completion(path, error);
            }
        }
    }

    /// Runs `operation` between the receive hooks. The outcome of the
    /// operation, failure included, is passed to the post hook.
    pub async fn around_receive<F, T>(&self, path: &Path, operation: F) -> AppResult<T>
    where
        F: std::future::Future<Output = AppResult<T>>,
    {
        if let Err(e) = self.pre_receive(path) {
            self.post_receive(path, Some(&e));
            return Err(e);
        }
        let result = operation.await;
        self.post_receive(path, result.as_ref().err());
        result
    }
}
