use crate::models::{DispatchContext, StorageKey, StorageRoute, UploadedFile};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

type UploadOptionsFn = dyn Fn(&UploadedFile, &DispatchContext) -> Option<Map<String, Value>> + Send + Sync;

/// Extra options the Lambda function should pass along when writing to a
/// bucket (ACL, cache headers, ...).
#[derive(Clone)]
pub enum UploadOptions {
    Static(Map<String, Value>),
    Dynamic(Arc<UploadOptionsFn>),
}

impl UploadOptions {
    pub fn dynamic<F>(f: F) -> Self
    where
        F: Fn(&UploadedFile, &DispatchContext) -> Option<Map<String, Value>> + Send + Sync + 'static,
    {
        Self::Dynamic(Arc::new(f))
    }

    /// Evaluate the options for one file. Empty maps count as no options.
    pub fn resolve(&self, file: &UploadedFile, context: &DispatchContext) -> Option<Map<String, Value>> {
        let options = match self {
            Self::Static(map) => Some(map.clone()),
            Self::Dynamic(f) => f(file, context),
        };
        options.filter(|map| !map.is_empty())
    }
}

impl fmt::Debug for UploadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(map) => f.debug_tuple("Static").field(map).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// How a destination path is chosen for a processed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocationStrategy {
    /// `<random hex><.ext>`
    #[default]
    Basic,
    /// `<record_type>/<record_id>/<name>/<random hex><.ext>`
    Pretty,
}

#[derive(Debug, Clone)]
pub struct StorageDescriptor {
    pub bucket: String,
    pub prefix: Option<String>,
    pub upload_options: Option<UploadOptions>,
    pub location: LocationStrategy,
}

impl StorageDescriptor {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: None,
            upload_options: None,
            location: LocationStrategy::Basic,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into()).filter(|p: &String| !p.is_empty());
        self
    }

    pub fn with_upload_options(mut self, options: UploadOptions) -> Self {
        self.upload_options = Some(options);
        self
    }

    pub fn with_location(mut self, location: LocationStrategy) -> Self {
        self.location = location;
        self
    }

    /// Where `file` should land in this storage.
    pub fn generate_location(&self, file: &UploadedFile, context: &DispatchContext) -> String {
        let basic = format!(
            "{}{}",
            Uuid::new_v4().simple(),
            file.extension().unwrap_or_default()
        );

        match self.location {
            LocationStrategy::Basic => basic,
            LocationStrategy::Pretty => format!(
                "{}/{}/{}/{}",
                underscore(&context.record_type),
                context.record_id,
                context.name,
                basic
            ),
        }
    }

    pub fn route(&self, file: &UploadedFile, context: &DispatchContext) -> StorageRoute {
        StorageRoute {
            name: self.bucket.clone(),
            prefix: self.prefix.clone(),
            upload_options: self
                .upload_options
                .as_ref()
                .and_then(|options| options.resolve(file, context)),
        }
    }
}

/// The source (`cache`) and destination (`store`) storages.
#[derive(Debug, Clone)]
pub struct Storages {
    pub cache: StorageDescriptor,
    pub store: StorageDescriptor,
}

impl Storages {
    pub fn new(cache: StorageDescriptor, store: StorageDescriptor) -> Self {
        Self { cache, store }
    }

    pub fn get(&self, key: StorageKey) -> &StorageDescriptor {
        match key {
            StorageKey::Cache => &self.cache,
            StorageKey::Store => &self.store,
        }
    }

    pub fn routes(&self, file: &UploadedFile, context: &DispatchContext) -> BTreeMap<StorageKey, StorageRoute> {
        StorageKey::ALL
            .iter()
            .map(|key| (*key, self.get(*key).route(file, context)))
            .collect()
    }
}

/// `BlogPost` -> `blog_post`, `Admin::User` -> `admin/user`
fn underscore(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev: Option<char> = None;
    for c in name.replace("::", "/").chars() {
        if c.is_ascii_uppercase() {
            if prev.is_some_and(|p| p.is_ascii_lowercase() || p.is_ascii_digit()) {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else if c == '-' {
            out.push('_');
        } else {
            out.push(c);
        }
        prev = Some(c);
    }
    out
}
