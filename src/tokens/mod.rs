//! Token book: storage and retrieval of generated tokens.

pub mod pagination;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errors::AppError;
use crate::id::{id_in, id_out, is_valid, IdGenerator};
use crate::models::{from_doc, to_doc, NewToken, Page, Token, TokenBody};
use crate::retry::{retry_on_conflict, RetryPolicy};
use crate::store::{SharedStore, StoreError};

pub use pagination::Addressing;

pub struct TokenBook {
    store: SharedStore,
    collection: String,
    ids: IdGenerator,
    retry: RetryPolicy,
    max_page_size: usize,
    shutdown: CancellationToken,
}

impl TokenBook {
    pub fn new(
        store: SharedStore,
        collection: impl Into<String>,
        retry: RetryPolicy,
        max_page_size: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            ids: IdGenerator::new(),
            retry,
            max_page_size,
            shutdown,
        }
    }

    pub fn with_id_generator(mut self, ids: IdGenerator) -> Self {
        self.ids = ids;
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub async fn get_token(&self, id: &str) -> Result<Token, AppError> {
        let key = key_for(id)?;
        let doc = self
            .store
            .read(&self.collection, &key)
            .await
            .map_err(not_found("token not found"))?;
        let body: TokenBody = from_doc(&key, doc.value)?;
        Ok(Token {
            id: id_out(&key),
            body,
        })
    }

    pub async fn get_svg(&self, id: &str) -> Result<String, AppError> {
        Ok(self.get_token(id).await?.body.svg)
    }

    /// Store a new token under a fresh time-based id and return its short form.
    ///
    /// Two tokens created within the same millisecond collide on the key;
    /// the loser backs off for a random interval and retries with a new id.
    pub async fn put_token(&self, token: NewToken) -> Result<String, AppError> {
        let body = to_doc(&token.validate()?)?;

        let key = retry_on_conflict("token creation", self.retry, &self.shutdown, |attempt| {
            let key = self.ids.generate();
            let body = body.clone();
            async move {
                debug!(id = %key, attempt, "creating token");
                self.store
                    .create(&self.collection, Some(&key), body)
                    .await
                    .map(|created| created.value)
                    .map_err(AppError::from)
            }
        })
        .await?;

        let id = id_out(&key);
        info!(id = %id, "token created");
        Ok(id)
    }

    pub async fn delete_token(&self, id: &str) -> Result<(), AppError> {
        let key = key_for(id)?;
        let current = self
            .store
            .read(&self.collection, &key)
            .await
            .map_err(not_found("token not found"))?;
        self.store
            .delete(&self.collection, &key, &current.revision)
            .await
            .map_err(not_found("token not found"))?;
        info!(id = %id_out(&key), "token deleted");
        Ok(())
    }

    pub async fn get_tokens(
        &self,
        addressing: &Addressing,
        count: usize,
        newest_first: bool,
    ) -> Result<Page, AppError> {
        if count == 0 || count > self.max_page_size {
            return Err(AppError::validation("count out of range"));
        }
        pagination::get_page(
            self.store.as_ref(),
            &self.collection,
            addressing,
            count,
            newest_first,
        )
        .await
    }
}

/// Stored key for a client-supplied id. Ids outside the alphabet can't exist.
pub(crate) fn key_for(id: &str) -> Result<String, AppError> {
    if !is_valid(id.trim()) {
        return Err(AppError::NotFound("token not found".to_string()));
    }
    Ok(id_in(id))
}

pub(crate) fn not_found(what: &'static str) -> impl Fn(StoreError) -> AppError {
    move |err| match err {
        StoreError::NotFound => AppError::NotFound(what.to_string()),
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::Clock;
    use crate::store::memory::MemoryStore;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn new_token() -> NewToken {
        NewToken {
            svg: Some("<svg/>".into()),
            generated: Some("2021-05-01T10:00:00.000Z".into()),
            keywords: Some(vec!["a".into(), "b".into(), "c".into()]),
            original_png: None,
        }
    }

    fn book(retries: u32) -> TokenBook {
        TokenBook::new(
            Arc::new(MemoryStore::new()),
            "tokens",
            RetryPolicy { max_retries: retries, base_ms: 1 },
            100,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_put_and_get_token() {
        let book = book(10);
        let id = book.put_token(new_token()).await.unwrap();
        assert!(!id.starts_with('0'));

        let token = book.get_token(&id).await.unwrap();
        assert_eq!(token.id, id);
        assert_eq!(token.body.keywords, vec!["a", "b", "c"]);
        assert_eq!(book.get_svg(&id.to_lowercase()).await.unwrap(), "<svg/>");
    }

    #[tokio::test]
    async fn test_missing_token() {
        let err = book(10).get_token("ZZZ").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(ref m) if m == "token not found"));
        let err = book(10).get_token("no/such id").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_frozen_clock_exhausts_retries() {
        let frozen: Clock = Arc::new(|| Utc.with_ymd_and_hms(2021, 6, 1, 0, 0, 0).unwrap());
        let book = book(2).with_id_generator(IdGenerator::with_clock(frozen));

        book.put_token(new_token()).await.unwrap();
        let err = book.put_token(new_token()).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_concurrent_creates_all_succeed() {
        let book = Arc::new(TokenBook::new(
            Arc::new(MemoryStore::new()),
            "tokens",
            RetryPolicy::new(10),
            100,
            CancellationToken::new(),
        ));
        let handles: Vec<_> = (0..20)
            .map(|_| {
                let book = book.clone();
                tokio::spawn(async move { book.put_token(new_token()).await })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap());
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 20);
    }

    #[tokio::test]
    async fn test_delete_token() {
        let book = book(10);
        let id = book.put_token(new_token()).await.unwrap();
        book.delete_token(&id).await.unwrap();
        assert!(matches!(book.get_token(&id).await, Err(AppError::NotFound(_))));
        assert!(matches!(book.delete_token(&id).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_count_bounds() {
        let book = book(10);
        for count in [0, 101] {
            let err = book.get_tokens(&Addressing::Offset(0), count, true).await.unwrap_err();
            assert_eq!(err.to_string(), "count out of range");
        }
    }
}
