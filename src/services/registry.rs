use crate::error::Result;
use crate::models::FunctionDescriptor;
use crate::services::lambda::LambdaClient;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Page size used when listing functions.
const PAGE_SIZE: i32 = 100;

/// Memoized list of the functions deployed in the account. The list is
/// fetched on first use and again only when explicitly forced.
pub struct FunctionRegistry {
    client: Arc<dyn LambdaClient>,
    cache: RwLock<Option<Arc<Vec<FunctionDescriptor>>>>,
}

impl FunctionRegistry {
    pub fn new(client: Arc<dyn LambdaClient>) -> Self {
        Self {
            client,
            cache: RwLock::new(None),
        }
    }

    /// Install a known list without asking Lambda.
    pub async fn seed(&self, functions: Vec<FunctionDescriptor>) {
        *self.cache.write().await = Some(Arc::new(functions));
    }

    /// The cached list, fetching it when nothing (or an empty list) is cached
    /// or when `force` is set.
    pub async fn list_functions(&self, force: bool) -> Result<Arc<Vec<FunctionDescriptor>>> {
        if !force {
            if let Some(cached) = Self::usable(&*self.cache.read().await) {
                return Ok(cached);
            }
        }

        let mut cache = self.cache.write().await;
        // Someone else may have filled the cache while we waited for the lock.
        if !force {
            if let Some(cached) = Self::usable(&cache) {
                return Ok(cached);
            }
        }

        let functions = Arc::new(self.fetch_all().await?);
        tracing::info!("📋 Loaded {} Lambda functions", functions.len());
        *cache = Some(functions.clone());
        Ok(functions)
    }

    pub async fn is_available(&self, name: &str) -> Result<bool> {
        Ok(self
            .list_functions(false)
            .await?
            .iter()
            .any(|f| f.function_name == name))
    }

    fn usable(cache: &Option<Arc<Vec<FunctionDescriptor>>>) -> Option<Arc<Vec<FunctionDescriptor>>> {
        cache.as_ref().filter(|list| !list.is_empty()).cloned()
    }

    async fn fetch_all(&self) -> Result<Vec<FunctionDescriptor>> {
        let mut functions = Vec::new();
        let mut marker = None;
        loop {
            let page = self.client.list_functions(marker, PAGE_SIZE).await?;
            functions.extend(page.functions);
            match page.next_marker {
                Some(next) => marker = Some(next),
                None => break,
            }
        }
        Ok(functions)
    }
}
