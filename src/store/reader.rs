use crate::error::StoreError;
use crate::models::{CanonicalField, FilterPredicate};
use crate::store::filter::{predicate_fields, projection, row_filter};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use rayon::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};

const READ_BATCH_SIZE: usize = 8192;

/// 已封存 store 的只读访问
///
/// 每次扫描独立打开文件, 不共享可变状态, 不同上传之间的并发读互不影响。
#[derive(Debug, Clone)]
pub struct StoreReader {
    path: PathBuf,
    num_rows: usize,
    num_row_groups: usize,
}

impl StoreReader {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let builder = ParquetRecordBatchReaderBuilder::try_new(open_file(path)?)?;
        let metadata = builder.metadata();
        Ok(Self {
            path: path.to_path_buf(),
            num_rows: metadata.file_metadata().num_rows().max(0) as usize,
            num_row_groups: metadata.num_row_groups(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_row_groups(&self) -> usize {
        self.num_row_groups
    }

    /// 带投影和行过滤的 reader builder; `columns` 为 None 时读取全部列
    fn prepare(
        &self,
        predicate: &FilterPredicate,
        columns: Option<&[CanonicalField]>,
    ) -> Result<ParquetRecordBatchReaderBuilder<File>, StoreError> {
        let mut builder = ParquetRecordBatchReaderBuilder::try_new(open_file(&self.path)?)?
            .with_batch_size(READ_BATCH_SIZE);

        if let Some(columns) = columns {
            let mask = projection(builder.parquet_schema(), columns)?;
            builder = builder.with_projection(mask);
        }
        if let Some(filter) = row_filter(builder.parquet_schema(), predicate)? {
            builder = builder.with_row_filter(filter);
        }
        Ok(builder)
    }

    /// 按导入顺序扫描过滤后的行, offset/limit 在过滤之后生效
    pub fn scan(
        &self,
        predicate: &FilterPredicate,
        columns: Option<&[CanonicalField]>,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<ParquetRecordBatchReader, StoreError> {
        let mut builder = self.prepare(predicate, columns)?;
        if offset > 0 {
            builder = builder.with_offset(offset);
        }
        if let Some(limit) = limit {
            builder = builder.with_limit(limit);
        }
        Ok(builder.build()?)
    }

    /// 匹配行数, 只解码谓词引用的列
    pub fn count(&self, predicate: &FilterPredicate) -> Result<usize, StoreError> {
        if predicate.is_empty() {
            return Ok(self.num_rows);
        }
        let fields = predicate_fields(predicate);
        let mut total = 0;
        for batch in self.scan(predicate, Some(&fields), 0, None)? {
            total += batch?.num_rows();
        }
        Ok(total)
    }

    /// 按 row group 并行折叠, 结果按 row group 顺序返回
    pub fn fold_partitions<T, I, F>(
        &self,
        predicate: &FilterPredicate,
        columns: &[CanonicalField],
        init: I,
        fold: F,
    ) -> Result<Vec<T>, StoreError>
    where
        T: Send,
        I: Fn() -> T + Sync,
        F: Fn(&mut T, &RecordBatch) -> Result<(), StoreError> + Sync,
    {
        let scan_group = |row_groups: Option<Vec<usize>>| -> Result<T, StoreError> {
            let mut builder = self.prepare(predicate, Some(columns))?;
            if let Some(groups) = row_groups {
                builder = builder.with_row_groups(groups);
            }
            let mut acc = init();
            for batch in builder.build()? {
                fold(&mut acc, &batch?)?;
            }
            Ok(acc)
        };

        if self.num_row_groups <= 1 {
            return Ok(vec![scan_group(None)?]);
        }

        (0..self.num_row_groups)
            .into_par_iter()
            .map(|rg| scan_group(Some(vec![rg])))
            .collect()
    }
}

fn open_file(path: &Path) -> Result<File, StoreError> {
    File::open(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}
