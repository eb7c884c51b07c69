use std::sync::Arc;

use chrono::Utc;
use url::Url;

use crate::{
    cache::LinkCache,
    codegen,
    error::{AppError, StoreError},
    models::{Link, NewLink},
    store::LinkStore,
};

/// Assigns short codes and creates links.
///
/// Uniqueness rests on the store: an insert that hits an existing code fails
/// with [`StoreError::Conflict`]. The existence check before the insert only
/// saves a doomed write and an extra generator round.
#[derive(Clone)]
pub struct LinkAllocator {
    links: Arc<dyn LinkStore>,
    cache: LinkCache,
    code_length: usize,
    max_attempts: u32,
}

impl LinkAllocator {
    pub fn new(
        links: Arc<dyn LinkStore>,
        cache: LinkCache,
        code_length: usize,
        max_attempts: u32,
    ) -> Self {
        Self {
            links,
            cache,
            code_length,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Create a link for `original_url`.
    ///
    /// A `desired_code` is used verbatim; if it is already taken the call
    /// fails with [`AppError::CodeConflict`]. Without one, random codes are
    /// tried until an unused one sticks or the attempt budget runs out.
    pub async fn allocate(
        &self,
        original_url: &str,
        owner_id: Option<&str>,
        desired_code: Option<&str>,
    ) -> Result<Link, AppError> {
        validate_url(original_url)?;

        let link = match desired_code {
            Some(code) => self.allocate_custom(original_url, owner_id, code).await?,
            None => self.allocate_generated(original_url, owner_id).await?,
        };

        self.cache.set(&link.short_code, &link.original_url);
        tracing::info!(
            short_code = %link.short_code,
            owner = owner_id.unwrap_or("guest"),
            "link created"
        );
        Ok(link)
    }

    async fn allocate_custom(
        &self,
        original_url: &str,
        owner_id: Option<&str>,
        code: &str,
    ) -> Result<Link, AppError> {
        if code.is_empty() {
            return Err(AppError::InvalidInput("short code must not be empty".into()));
        }
        if self.links.find_by_code(code).await?.is_some() {
            return Err(AppError::CodeConflict(code.to_owned()));
        }

        match self.links.insert_link(new_link(code, original_url, owner_id)).await {
            Ok(link) => Ok(link),
            // Lost the race against a concurrent allocation of the same code.
            Err(StoreError::Conflict(_)) => Err(AppError::CodeConflict(code.to_owned())),
            Err(e) => Err(e.into()),
        }
    }

    async fn allocate_generated(
        &self,
        original_url: &str,
        owner_id: Option<&str>,
    ) -> Result<Link, AppError> {
        for attempt in 1..=self.max_attempts {
            let code = codegen::generate(self.code_length);
            if self.links.find_by_code(&code).await?.is_some() {
                tracing::debug!(attempt, code = %code, "generated code already in use");
                continue;
            }

            match self.links.insert_link(new_link(&code, original_url, owner_id)).await {
                Ok(link) => return Ok(link),
                Err(StoreError::Conflict(_)) => {
                    tracing::debug!(attempt, code = %code, "generated code taken at insert");
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::warn!(
            attempts = self.max_attempts,
            "short code allocation exhausted its retry budget"
        );
        Err(AppError::AllocationExhausted(self.max_attempts))
    }
}

fn new_link(code: &str, original_url: &str, owner_id: Option<&str>) -> NewLink {
    NewLink {
        short_code: code.to_owned(),
        original_url: original_url.to_owned(),
        owner_id: owner_id.map(str::to_owned),
        created_at: Utc::now(),
    }
}

/// Accept any absolute URL the parser understands. Control characters are
/// refused outright: the parser would quietly drop them but the stored string
/// keeps them, and they cannot go into a `Location` header.
pub fn validate_url(raw: &str) -> Result<(), AppError> {
    if raw.trim().is_empty() {
        return Err(AppError::InvalidInput("URL must not be empty".into()));
    }
    if raw.chars().any(|c| c.is_ascii_control()) {
        return Err(AppError::InvalidInput(
            "URL must not contain control characters".into(),
        ));
    }

    Url::parse(raw).map_err(|e| AppError::InvalidInput(format!("{raw}: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::store::{flaky::FlakyStore, MemoryStore};

    fn allocator(store: Arc<dyn LinkStore>) -> LinkAllocator {
        LinkAllocator::new(store, LinkCache::new(), codegen::DEFAULT_CODE_LENGTH, 10)
    }

    #[tokio::test]
    async fn generated_code_has_fixed_length_and_alphabet() {
        let store = Arc::new(MemoryStore::new());
        let service = allocator(store.clone());

        let link = service
            .allocate("https://example.com/article/123", None, None)
            .await
            .unwrap();

        assert_eq!(link.short_code.len(), 6);
        assert!(link.short_code.bytes().all(|b| codegen::ALPHABET.contains(&b)));
        assert_eq!(link.total_clicks, 0);
        assert_eq!(link.last_clicked_at, None);
        assert_eq!(link.owner_id, None);

        let stored = store.find_by_code(&link.short_code).await.unwrap().unwrap();
        assert_eq!(stored.original_url, "https://example.com/article/123");
        assert_eq!(
            service.cache.get(&link.short_code).as_deref(),
            Some("https://example.com/article/123")
        );
    }

    #[tokio::test]
    async fn reusing_a_generated_code_as_custom_conflicts() {
        let service = allocator(Arc::new(MemoryStore::new()));

        let first = service
            .allocate("https://example.com/article/123", None, None)
            .await
            .unwrap();
        let err = service
            .allocate("https://example.com/other", None, Some(&first.short_code))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::CodeConflict(code) if code == first.short_code));
    }

    #[tokio::test]
    async fn custom_code_is_used_verbatim() {
        let service = allocator(Arc::new(MemoryStore::new()));

        let link = service
            .allocate("https://example.com", Some("user-1"), Some("My_Alias-2024"))
            .await
            .unwrap();

        assert_eq!(link.short_code, "My_Alias-2024");
        assert_eq!(link.owner_id.as_deref(), Some("user-1"));
    }

    #[tokio::test]
    async fn duplicate_custom_code_never_overwrites() {
        let store = Arc::new(MemoryStore::new());
        let service = allocator(store.clone());

        service
            .allocate("https://first.example", None, Some("promo"))
            .await
            .unwrap();
        let err = service
            .allocate("https://second.example", Some("u2"), Some("promo"))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::CodeConflict(_)));
        let kept = store.find_by_code("promo").await.unwrap().unwrap();
        assert_eq!(kept.original_url, "https://first.example");
    }

    #[tokio::test]
    async fn insert_conflict_on_custom_code_is_reported_as_conflict() {
        let store = Arc::new(FlakyStore::new());
        store.insert_conflicts.store(1, Ordering::SeqCst);
        let service = allocator(store);

        let err = service
            .allocate("https://example.com", None, Some("raced"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::CodeConflict(_)));
    }

    #[tokio::test]
    async fn insert_conflict_on_generated_code_retries() {
        let store = Arc::new(FlakyStore::new());
        store.insert_conflicts.store(3, Ordering::SeqCst);
        let service = allocator(store.clone());

        let link = service
            .allocate("https://example.com", None, None)
            .await
            .unwrap();
        assert!(store.inner.find_by_code(&link.short_code).await.unwrap().is_some());
        assert_eq!(store.lookups.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn retry_budget_is_bounded() {
        let store = Arc::new(FlakyStore::new());
        FlakyStore::set(&store.every_code_taken);
        let service = LinkAllocator::new(store.clone(), LinkCache::new(), 6, 4);

        let err = service
            .allocate("https://example.com", None, None)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::AllocationExhausted(4)));
        assert_eq!(store.lookups.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn invalid_url_is_rejected_before_any_store_access() {
        let store = Arc::new(FlakyStore::new());
        let service = allocator(store.clone());

        for bad in [
            "",
            "not a url",
            "example.com/path",
            "https://example.com/a\nb",
            "https://example.com/\tpath",
            "https://example.com/a\rb",
        ] {
            let err = service.allocate(bad, None, None).await.unwrap_err();
            assert!(matches!(err, AppError::InvalidInput(_)), "{bad}");
        }
        assert_eq!(store.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn non_http_schemes_are_accepted() {
        let service = allocator(Arc::new(MemoryStore::new()));

        for url in ["ftp://example.com/file", "mailto:someone@example.com"] {
            let link = service.allocate(url, None, None).await.unwrap();
            assert_eq!(link.original_url, url);
        }
    }

    #[tokio::test]
    async fn lookup_failure_is_store_unavailable() {
        let store = Arc::new(FlakyStore::new());
        FlakyStore::set(&store.fail_lookups);
        let service = allocator(store);

        let err = service
            .allocate("https://example.com", None, Some("abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StoreUnavailable(_)));
    }
}
