use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use ndarray::Array2;
use ndarray_npy::{ReadNpyExt, WriteNpyExt};

use crate::error::{Error, Result};
use crate::index::{FeatureIndex, ImageRecord, Metadata};

const CURRENT: &str = "CURRENT";
const GEN_PREFIX: &str = "gen-";
const PATHS_FILE: &str = "paths.txt";
const METADATA_FILE: &str = "metadata.json";

/// 索引的持久化存储
///
/// 每次保存写入一个新的 `gen-NNNNNN` 目录，包含特征矩阵、路径列表和元数据三个文件，
/// 全部写完后通过临时文件 + rename 原子地替换 `CURRENT` 指针。读取方因此只会看到
/// 完整的旧版本或完整的新版本。
///
/// 一个索引目录只保存一个模型的特征，换用其他模型重建会替换掉原有的特征。
#[derive(Debug, Clone)]
pub struct IndexStore {
    dir: PathBuf,
}

impl IndexStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 特征矩阵文件名，每个模型一个文件
    pub fn features_file(model: &str) -> String {
        format!("features_{}.npy", model.replace(['/', '\\'], "_"))
    }

    /// 当前生效的版本目录
    pub fn current_generation(&self) -> Result<Option<PathBuf>> {
        let pointer = self.dir.join(CURRENT);
        if !pointer.exists() {
            return Ok(None);
        }
        let name = fs::read_to_string(&pointer)?;
        let name = name.trim();
        if name.is_empty() || !name.starts_with(GEN_PREFIX) {
            return Err(Error::CorruptIndex(format!("无效的 CURRENT 内容: {name:?}")));
        }
        Ok(Some(self.dir.join(name)))
    }

    /// 当前版本保存了特征的模型名称
    pub fn model(&self) -> Result<Option<String>> {
        let Some(gen_dir) = self.current_generation()? else {
            return Ok(None);
        };
        for entry in fs::read_dir(gen_dir)? {
            let name = entry?.file_name().to_string_lossy().to_string();
            if let Some(model) = name.strip_prefix("features_").and_then(|n| n.strip_suffix(".npy")) {
                return Ok(Some(model.to_string()));
            }
        }
        Ok(None)
    }

    /// 加载指定模型的索引，没有已保存的索引时返回 `None`
    pub fn load(&self, model: &str) -> Result<Option<FeatureIndex>> {
        let Some(gen_dir) = self.current_generation()? else {
            return Ok(None);
        };
        let features = gen_dir.join(Self::features_file(model));
        if !features.exists() {
            warn!("当前索引不包含模型 {} 的特征: {}", model, features.display());
            return Ok(None);
        }
        debug!("读取索引: {}", gen_dir.display());

        let matrix = Array2::<f32>::read_npy(BufReader::new(File::open(&features)?))?;

        let paths = BufReader::new(File::open(gen_dir.join(PATHS_FILE))?)
            .lines()
            .filter(|line| !matches!(line, Ok(l) if l.trim().is_empty()))
            .map(|line| line.map(|l| l.trim_end().to_string()))
            .collect::<std::io::Result<Vec<_>>>()?;

        let mut metadata: HashMap<String, Metadata> =
            serde_json::from_reader(BufReader::new(File::open(gen_dir.join(METADATA_FILE))?))?;

        let records = paths
            .into_iter()
            .map(|filename| {
                let metadata = metadata
                    .remove(&filename)
                    .ok_or_else(|| Error::CorruptIndex(format!("缺少元数据: {filename}")))?;
                Ok(ImageRecord { path: metadata.path.clone(), filename, metadata })
            })
            .collect::<Result<Vec<_>>>()?;

        let index = FeatureIndex::new(model, records, matrix)?;
        info!("已加载 {} 张图片的特征", index.len());
        Ok(Some(index))
    }

    /// 保存索引为新版本并切换 `CURRENT`，成功后清理旧版本
    pub fn save(&self, index: &FeatureIndex) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let gen_name = format!("{GEN_PREFIX}{:06}", self.next_generation()?);
        let gen_dir = self.dir.join(&gen_name);
        if gen_dir.exists() {
            fs::remove_dir_all(&gen_dir)?;
        }
        fs::create_dir(&gen_dir)?;

        if let Err(e) = write_generation(&gen_dir, index) {
            // 写入失败时丢弃不完整的版本，CURRENT 仍指向旧版本
            let _ = fs::remove_dir_all(&gen_dir);
            return Err(e);
        }

        let tmp = self.dir.join(format!("{CURRENT}.tmp"));
        {
            let mut file = File::create(&tmp)?;
            file.write_all(gen_name.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, self.dir.join(CURRENT))?;
        info!("索引已保存: {}", gen_dir.display());

        self.remove_stale(&gen_name);
        Ok(())
    }

    fn generations(&self) -> Result<Vec<(u64, String)>> {
        if !self.dir.exists() {
            return Ok(vec![]);
        }
        let mut gens = vec![];
        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name().to_string_lossy().to_string();
            if let Some(n) = name.strip_prefix(GEN_PREFIX).and_then(|n| n.parse().ok()) {
                gens.push((n, name));
            }
        }
        gens.sort();
        Ok(gens)
    }

    fn next_generation(&self) -> Result<u64> {
        Ok(self.generations()?.last().map(|(n, _)| n + 1).unwrap_or(1))
    }

    /// 删除除当前版本外的所有版本目录，失败只记录日志
    fn remove_stale(&self, keep: &str) {
        let gens = match self.generations() {
            Ok(gens) => gens,
            Err(e) => {
                warn!("列出旧索引失败: {e}");
                return;
            }
        };
        for (_, name) in gens.into_iter().filter(|(_, name)| name != keep) {
            if let Err(e) = fs::remove_dir_all(self.dir.join(&name)) {
                warn!("删除旧索引 {name} 失败: {e}");
            }
        }
    }
}

fn write_generation(dir: &Path, index: &FeatureIndex) -> Result<()> {
    let file = File::create(dir.join(IndexStore::features_file(index.model())))?;
    let mut writer = BufWriter::new(file);
    index.matrix().write_npy(&mut writer)?;
    sync(writer)?;

    let mut writer = BufWriter::new(File::create(dir.join(PATHS_FILE))?);
    let names = index.records().iter().map(|r| r.filename.as_str()).collect::<Vec<_>>();
    writer.write_all(names.join("\n").as_bytes())?;
    sync(writer)?;

    let metadata = index
        .records()
        .iter()
        .map(|r| (r.filename.as_str(), &r.metadata))
        .collect::<HashMap<_, _>>();
    let mut writer = BufWriter::new(File::create(dir.join(METADATA_FILE))?);
    serde_json::to_writer_pretty(&mut writer, &metadata)?;
    sync(writer)?;
    Ok(())
}

fn sync(writer: BufWriter<File>) -> Result<()> {
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(())
}
