use crate::error::StoreError;
use crate::models::UsageRecord;
use crate::store::schema::{records_to_batch, usage_schema};
use arrow::datatypes::SchemaRef;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// 写入中的临时文件路径
pub fn partial_path(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error(path)(e)),
    }
}

/// 删除 store 文件及残留的临时文件
pub fn discard(final_path: &Path) -> Result<(), StoreError> {
    remove_if_exists(&partial_path(final_path))?;
    remove_if_exists(final_path)
}

/// 列式 store 写入器
///
/// 先写 `<file>.partial`, `finish` 时落盘后原子 rename,
/// 因此读端永远看不到写了一半的文件。
pub struct StoreWriter {
    final_path: PathBuf,
    partial_path: PathBuf,
    schema: SchemaRef,
    writer: ArrowWriter<File>,
    rows: u64,
}

impl StoreWriter {
    /// 创建写入器, 同时清掉之前失败留下的旧文件
    pub fn create(final_path: &Path, row_group_size: usize) -> Result<Self, StoreError> {
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        discard(final_path)?;

        let partial_path = partial_path(final_path);
        let file = File::create(&partial_path).map_err(io_error(&partial_path))?;
        let schema = usage_schema();
        let props = WriterProperties::builder()
            .set_compression(Compression::ZSTD(ZstdLevel::default()))
            .set_max_row_group_size(row_group_size.max(1))
            .build();
        let writer = ArrowWriter::try_new(file, schema.clone(), Some(props))?;

        Ok(Self {
            final_path: final_path.to_path_buf(),
            partial_path,
            schema,
            writer,
            rows: 0,
        })
    }

    pub fn write_batch(&mut self, records: &[UsageRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        let batch = records_to_batch(&self.schema, records)?;
        self.writer.write(&batch)?;
        self.rows += records.len() as u64;
        Ok(())
    }

    pub fn rows_written(&self) -> u64 {
        self.rows
    }

    /// 写 footer, fsync, rename 到最终路径
    pub fn finish(self) -> Result<PathBuf, StoreError> {
        let StoreWriter {
            final_path,
            partial_path,
            writer,
            rows,
            ..
        } = self;

        let file = writer.into_inner()?;
        file.sync_all().map_err(io_error(&partial_path))?;
        drop(file);
        fs::rename(&partial_path, &final_path).map_err(io_error(&final_path))?;

        tracing::debug!("store {} sealed with {} rows", final_path.display(), rows);
        Ok(final_path)
    }

    /// 放弃写入, 删除临时文件
    pub fn abort(self) {
        let StoreWriter { partial_path, writer, .. } = self;
        drop(writer);
        if let Err(e) = remove_if_exists(&partial_path) {
            tracing::warn!("failed to remove partial store: {}", e);
        }
    }
}
