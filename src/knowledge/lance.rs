//! LanceDB Embedding Table - 임베딩 행렬 영속화
//!
//! Dense 인덱스의 페이지 스냅샷과 임베딩 행렬을 LanceDB 테이블 하나에 저장합니다.
//! 검색 자체는 메모리의 [`super::vector::FlatIndex`]가 담당하고,
//! 이 테이블은 재시작 시 `load()`로 스냅샷을 복원하는 용도입니다.
//! ref: https://lancedb.github.io/lancedb/

use std::path::Path;
use std::sync::Arc;

use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};

use crate::error::{Error, Result};

use super::page::Page;

/// 임베딩 테이블 이름
const TABLE_NAME: &str = "page_embeddings";

// ============================================================================
// Types
// ============================================================================

/// 테이블 한 행: 페이지 + 임베딩
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRow {
    /// 페이지 인덱스
    pub page_id: usize,
    pub page: Page,
    pub embedding: Vec<f32>,
}

// ============================================================================
// EmbeddingTable
// ============================================================================

pub struct EmbeddingTable {
    db: Connection,
    dimension: usize,
}

impl EmbeddingTable {
    /// LanceDB 디렉토리 열기 (없으면 생성)
    pub async fn open(path: &Path, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::Config("embedding dimension must be positive".into()));
        }

        if !path.exists() {
            tokio::fs::create_dir_all(path).await?;
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| Error::Config(format!("invalid path encoding: {:?}", path)))?;

        let db = lancedb::connect(path_str).execute().await?;

        Ok(Self { db, dimension })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn schema(&self) -> Schema {
        Schema::new(vec![
            Field::new("page_id", DataType::Int64, false),
            Field::new("header", DataType::Utf8, false),
            Field::new("content", DataType::Utf8, false),
            Field::new("metadata", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension as i32,
                ),
                false,
            ),
        ])
    }

    /// 행들을 Arrow RecordBatch로 변환
    fn rows_to_batch(&self, rows: &[EmbeddingRow]) -> Result<RecordBatch> {
        let page_ids: Vec<i64> = rows.iter().map(|r| r.page_id as i64).collect();
        let headers: Vec<&str> = rows.iter().map(|r| r.page.header.as_str()).collect();
        let contents: Vec<&str> = rows.iter().map(|r| r.page.content.as_str()).collect();
        let metadata = rows
            .iter()
            .map(|r| serde_json::to_string(&r.page.metadata))
            .collect::<serde_json::Result<Vec<String>>>()?;

        let mut flat = Vec::with_capacity(rows.len() * self.dimension);
        for row in rows {
            if row.embedding.len() != self.dimension {
                return Err(Error::encoding(format!(
                    "page {} has dimension {}, table expects {}",
                    row.page_id,
                    row.embedding.len(),
                    self.dimension
                )));
            }
            flat.extend_from_slice(&row.embedding);
        }

        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings = FixedSizeListArray::try_new(
            field,
            self.dimension as i32,
            Arc::new(Float32Array::from(flat)) as Arc<dyn Array>,
            None,
        )?;

        let batch = RecordBatch::try_new(
            Arc::new(self.schema()),
            vec![
                Arc::new(Int64Array::from(page_ids)),
                Arc::new(StringArray::from(headers)),
                Arc::new(StringArray::from(contents)),
                Arc::new(StringArray::from(metadata)),
                Arc::new(embeddings),
            ],
        )?;

        Ok(batch)
    }

    async fn table_exists(&self) -> Result<bool> {
        let names = self.db.table_names().execute().await?;
        Ok(names.iter().any(|n| n == TABLE_NAME))
    }

    /// 테이블 전체 교체
    ///
    /// 새 배치를 먼저 만들고 나서 기존 테이블을 지우므로, 변환에 실패하면
    /// 저장된 행은 그대로 남습니다.
    pub async fn replace(&self, rows: &[EmbeddingRow]) -> Result<()> {
        let batch = if rows.is_empty() {
            None
        } else {
            Some(self.rows_to_batch(rows)?)
        };

        self.drop_all().await?;

        if let Some(batch) = batch {
            self.write_batch(batch).await?;
            tracing::debug!("Replaced embedding table with {} rows", rows.len());
        }
        Ok(())
    }

    /// 행 추가 (테이블이 없으면 생성)
    pub async fn append(&self, rows: &[EmbeddingRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let batch = self.rows_to_batch(rows)?;
        self.write_batch(batch).await?;

        tracing::debug!("Persisted {} embedding rows", rows.len());
        Ok(())
    }

    async fn write_batch(&self, batch: RecordBatch) -> Result<()> {
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        if self.table_exists().await? {
            let table = self.db.open_table(TABLE_NAME).execute().await?;
            table.add(batches).execute().await?;
        } else {
            self.db.create_table(TABLE_NAME, batches).execute().await?;
        }
        Ok(())
    }

    /// 저장된 행 전체 (page_id 순). 테이블이 없으면 `None`
    pub async fn load(&self) -> Result<Option<Vec<EmbeddingRow>>> {
        if !self.table_exists().await? {
            return Ok(None);
        }

        let table = self.db.open_table(TABLE_NAME).execute().await?;
        let count = table.count_rows(None).await?;
        if count == 0 {
            return Ok(Some(vec![]));
        }

        let batches: Vec<RecordBatch> = table
            .query()
            .limit(count)
            .execute()
            .await?
            .try_collect()
            .await?;

        let mut rows = Vec::with_capacity(count);
        for batch in &batches {
            rows.extend(self.batch_to_rows(batch)?);
        }

        rows.sort_by_key(|r| r.page_id);
        Ok(Some(rows))
    }

    fn batch_to_rows(&self, batch: &RecordBatch) -> Result<Vec<EmbeddingRow>> {
        let page_ids = column::<Int64Array>(batch, "page_id")?;
        let headers = column::<StringArray>(batch, "header")?;
        let contents = column::<StringArray>(batch, "content")?;
        let metadata = column::<StringArray>(batch, "metadata")?;
        let embeddings = column::<FixedSizeListArray>(batch, "embedding")?;

        let mut rows = Vec::with_capacity(batch.num_rows());
        for i in 0..batch.num_rows() {
            let values = embeddings.value(i);
            let values = values
                .as_any()
                .downcast_ref::<Float32Array>()
                .ok_or_else(|| Error::Corrupt("embedding values are not f32".into()))?;

            rows.push(EmbeddingRow {
                page_id: page_ids.value(i) as usize,
                page: Page {
                    header: headers.value(i).to_string(),
                    content: contents.value(i).to_string(),
                    metadata: serde_json::from_str(metadata.value(i))?,
                },
                embedding: values.values().to_vec(),
            });
        }

        Ok(rows)
    }

    /// 저장된 행 수. 테이블이 없으면 0
    pub async fn count(&self) -> Result<usize> {
        if !self.table_exists().await? {
            return Ok(0);
        }

        let table = self.db.open_table(TABLE_NAME).execute().await?;
        Ok(table.count_rows(None).await?)
    }

    /// 테이블 삭제
    pub async fn drop_all(&self) -> Result<()> {
        if self.table_exists().await? {
            self.db.drop_table(TABLE_NAME).await?;
        }
        Ok(())
    }
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| Error::Corrupt(format!("missing {} column", name)))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn row(page_id: usize, value: f32) -> EmbeddingRow {
        EmbeddingRow {
            page_id,
            page: Page::new(format!("h{}", page_id), format!("content {}", page_id))
                .with_meta("n", page_id as u64),
            embedding: vec![value; 4],
        }
    }

    #[tokio::test]
    async fn test_missing_table_loads_none() {
        let temp_dir = TempDir::new().unwrap();
        let table = EmbeddingTable::open(&temp_dir.path().join("dense"), 4)
            .await
            .unwrap();

        assert!(table.load().await.unwrap().is_none());
        assert_eq!(table.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_append_and_load_sorted() {
        let temp_dir = TempDir::new().unwrap();
        let table = EmbeddingTable::open(&temp_dir.path().join("dense"), 4)
            .await
            .unwrap();

        table.append(&[row(0, 0.1), row(1, 0.2)]).await.unwrap();
        table.append(&[row(2, 0.3)]).await.unwrap();
        assert_eq!(table.count().await.unwrap(), 3);

        let rows = table.load().await.unwrap().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2], row(2, 0.3));
        assert_eq!(rows[0].page.metadata["n"], 0);
    }

    #[tokio::test]
    async fn test_replace_and_drop() {
        let temp_dir = TempDir::new().unwrap();
        let table = EmbeddingTable::open(&temp_dir.path().join("dense"), 4)
            .await
            .unwrap();

        table.append(&[row(0, 0.1), row(1, 0.2)]).await.unwrap();
        table.replace(&[row(0, 0.9)]).await.unwrap();

        let rows = table.load().await.unwrap().unwrap();
        assert_eq!(rows, vec![row(0, 0.9)]);

        table.drop_all().await.unwrap();
        assert!(table.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let table = EmbeddingTable::open(&temp_dir.path().join("dense"), 3)
            .await
            .unwrap();

        let result = table.append(&[row(0, 0.1)]).await;
        assert!(matches!(result, Err(Error::Encoding { .. })));
    }

    #[tokio::test]
    async fn test_failed_replace_keeps_previous_rows() {
        let temp_dir = TempDir::new().unwrap();
        let table = EmbeddingTable::open(&temp_dir.path().join("dense"), 4)
            .await
            .unwrap();

        table.append(&[row(0, 0.1), row(1, 0.2)]).await.unwrap();

        let mut bad = row(0, 0.9);
        bad.embedding = vec![0.9; 3];
        let result = table.replace(&[bad]).await;
        assert!(matches!(result, Err(Error::Encoding { .. })));

        assert_eq!(table.count().await.unwrap(), 2);
        let rows = table.load().await.unwrap().unwrap();
        assert_eq!(rows, vec![row(0, 0.1), row(1, 0.2)]);
    }
}
