//! 项目持久化、最近项目与导入导出
//!
//! 负责 .rhproj 项目文件的读写、存储根目录下 recent_projects.json 的维护、
//! 按项目存储的考试设置，以及导出归档（manifest + 清洗副本 + zip）和
//! 带完整性校验的导入。

use crate::document_parser;
use crate::models::{AppError, ExamSettings, Manifest, Project, RecentProject};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use zip::write::FileOptions;

type Result<T> = std::result::Result<T, AppError>;

/// 项目文件扩展名
pub const PROJECT_EXTENSION: &str = "rhproj";
/// 导出归档在项目目录下的文件名
pub const EXPORT_ARCHIVE_NAME: &str = "rh_output.zip";
/// 最近项目列表的容量上限
pub const RECENT_PROJECTS_CAP: usize = 10;

const RECENT_PROJECTS_FILE: &str = "recent_projects.json";
const EXAM_SETTINGS_FILE: &str = "exam_settings.json";
const MANIFEST_FILE: &str = "manifest.json";
const OUTPUT_DIR: &str = "output";
const IMPORTS_DIR: &str = "imports";
/// 导出副本文件名携带的后缀，导入时剥离
const EXPORT_SUFFIX: &str = "_exp";
/// 归档格式版本号
const ARCHIVE_VERSION: &str = "v2";

/// Windows 与 Unix 文件名都不允许出现的字符
const INVALID_NAME_CHARS: [char; 9] = ['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

// ============================================================
// 项目文件读写
// ============================================================

/// 将项目写入 <storage>/<name>/<name>.rhproj（缩进 JSON）
pub fn save_project(project: &Project) -> Result<()> {
    let path = project
        .project_file_path()
        .ok_or_else(|| AppError::validation("项目缺少名称或存储路径，无法保存"))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(project)?;
    fs::write(&path, json)?;
    debug!("[ProjectManager] 项目已保存: {}", path.display());
    Ok(())
}

/// 读入 .rhproj 项目文件并刷新访问时间
pub fn load_project(path: &Path) -> Result<Project> {
    if !path.exists() {
        return Err(AppError::not_found(format!(
            "项目文件不存在: {}",
            path.display()
        )));
    }

    let json = fs::read_to_string(path)?;
    let mut project: Project = serde_json::from_str(&json)
        .map_err(|e| AppError::validation(format!("项目文件解析失败: {}", e)))?;
    project.last_accessed = Some(Utc::now());
    Ok(project)
}

// ============================================================
// 考试设置
// ============================================================

/// 读取项目目录下的考试设置，文件缺失时返回默认值
pub fn load_exam_settings(project: &Project) -> Result<ExamSettings> {
    let dir = project
        .project_dir()
        .ok_or_else(|| AppError::validation("项目缺少名称或存储路径"))?;
    let path = dir.join(EXAM_SETTINGS_FILE);
    if !path.exists() {
        return Ok(ExamSettings::default());
    }

    let json = fs::read_to_string(&path)?;
    match serde_json::from_str(&json) {
        Ok(settings) => Ok(settings),
        Err(e) => {
            warn!("[ProjectManager] 考试设置损坏，回退默认值: {}", e);
            Ok(ExamSettings::default())
        }
    }
}

/// 保存考试设置到项目目录下的 exam_settings.json
pub fn save_exam_settings(project: &Project, settings: &ExamSettings) -> Result<()> {
    let dir = project
        .project_dir()
        .ok_or_else(|| AppError::validation("项目缺少名称或存储路径"))?;
    fs::create_dir_all(&dir)?;

    let json = serde_json::to_string_pretty(settings)?;
    fs::write(dir.join(EXAM_SETTINGS_FILE), json)?;
    Ok(())
}

// ============================================================
// 导出
// ============================================================

/// 导出项目归档
///
/// 重建项目目录下的 output/，写入 manifest.json 与清空作答状态的
/// `<name>_exp.rhproj` 副本（EF 值与复习标记随副本保留），再把 output/
/// 打包为项目目录下的 rh_output.zip。清单携带副本的 SHA-256 校验和，
/// 导入端据此验证完整性。
pub fn export_project(project: &Project) -> Result<PathBuf> {
    let name = project
        .project_name
        .as_deref()
        .ok_or_else(|| AppError::validation("项目缺少名称，无法导出"))?;
    let project_dir = project
        .project_dir()
        .ok_or_else(|| AppError::validation("项目缺少存储路径，无法导出"))?;

    let output_dir = project_dir.join(OUTPUT_DIR);
    if output_dir.exists() {
        fs::remove_dir_all(&output_dir)?;
    }
    fs::create_dir_all(&output_dir)?;

    // 清洗副本：清空作答状态后再入包
    let mut export_copy = project.clone();
    if let Some(chapters) = export_copy.chapters.as_deref_mut() {
        for chapter in chapters {
            if let Some(questions) = chapter.questions.as_deref_mut() {
                for question in questions {
                    question.reset_answer();
                }
            }
        }
    }

    let export_file = format!("{}{}.{}", name, EXPORT_SUFFIX, PROJECT_EXTENSION);
    let export_path = output_dir.join(&export_file);
    fs::write(&export_path, serde_json::to_string_pretty(&export_copy)?)?;

    let manifest = Manifest {
        project_file: Some(export_file),
        bank_file: project.question_bank_path.clone(),
        version: Some(ARCHIVE_VERSION.to_string()),
        checksum: Some(calculate_file_hash(&export_path)?),
    };
    fs::write(
        output_dir.join(MANIFEST_FILE),
        serde_json::to_string_pretty(&manifest)?,
    )?;

    let zip_path = project_dir.join(EXPORT_ARCHIVE_NAME);
    write_archive(&output_dir, &zip_path)?;
    info!("[ProjectManager] 项目 {} 已导出: {}", name, zip_path.display());
    Ok(zip_path)
}

/// 计算文件的 SHA-256 校验和（十六进制小写）
fn calculate_file_hash(path: &Path) -> Result<String> {
    let file = File::open(path)
        .map_err(|e| AppError::file_system(format!("无法打开文件计算校验和: {}", e)))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// 将目录内容打包为 zip（Deflate 压缩，条目相对目录根）
fn write_archive(source_dir: &Path, zip_path: &Path) -> Result<()> {
    let file = File::create(zip_path)
        .map_err(|e| AppError::file_system(format!("无法创建归档文件: {}", e)))?;
    let mut zip = zip::ZipWriter::new(file);
    let file_options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for entry in walkdir::WalkDir::new(source_dir).min_depth(1) {
        let entry = entry.map_err(|e| AppError::file_system(format!("遍历导出目录失败: {}", e)))?;
        let rel = entry
            .path()
            .strip_prefix(source_dir)
            .map_err(|e| AppError::file_system(format!("计算归档相对路径失败: {}", e)))?;
        let entry_name = rel.to_string_lossy().replace('\\', "/");

        if entry.file_type().is_dir() {
            zip.add_directory(format!("{}/", entry_name), file_options)?;
            continue;
        }
        zip.start_file(entry_name, file_options)?;
        zip.write_all(&fs::read(entry.path())?)?;
    }

    zip.finish()?;
    Ok(())
}

/// 安全解压归档到目标目录
///
/// 逐条目过滤路径组件：绝对路径条目整体跳过，上级目录引用被剥离，
/// 保证所有产物都落在目标目录内。
fn extract_archive(archive_path: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;

    let file = File::open(archive_path)
        .map_err(|e| AppError::file_system(format!("无法打开归档文件: {}", e)))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| AppError::file_system(format!("解析归档失败: {}", e)))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| AppError::file_system(format!("读取归档条目失败: {}", e)))?;
        let entry_name = entry.name().to_string();

        let mut rel = PathBuf::new();
        let mut dangerous = false;
        for component in Path::new(&entry_name).components() {
            match component {
                Component::Normal(part) => rel.push(part),
                Component::RootDir | Component::Prefix(_) => {
                    warn!("[ProjectManager] 归档条目包含绝对路径，已跳过: {}", entry_name);
                    dangerous = true;
                    break;
                }
                Component::ParentDir => {
                    warn!(
                        "[ProjectManager] 归档条目包含上级目录引用，已剥离该段: {}",
                        entry_name
                    );
                }
                Component::CurDir => {}
            }
        }
        if dangerous || rel.as_os_str().is_empty() {
            continue;
        }

        let out_path = dest.join(&rel);
        if entry_name.ends_with('/') {
            fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut out_file = File::create(&out_path)
            .map_err(|e| AppError::file_system(format!("无法写入解压文件 {}: {}", out_path.display(), e)))?;
        std::io::copy(&mut entry, &mut out_file)?;
    }

    Ok(())
}

fn validate_project_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(AppError::validation("项目名称不能为空"));
    }
    if name
        .chars()
        .any(|c| INVALID_NAME_CHARS.contains(&c) || c.is_control())
    {
        return Err(AppError::validation("项目名称包含无效字符"));
    }
    Ok(())
}

// ============================================================
// 项目管理器
// ============================================================

/// 以存储根目录为作用域的项目管理器
pub struct ProjectManager {
    storage_root: PathBuf,
}

impl ProjectManager {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
        }
    }

    /// 默认存储根目录：系统数据目录下的 ReciteHelper
    pub fn with_default_root() -> Result<Self> {
        let base = dirs::data_dir()
            .ok_or_else(|| AppError::configuration("无法确定系统数据目录"))?;
        Ok(Self::new(base.join("ReciteHelper")))
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// 创建新项目
    ///
    /// 校验名称合法且未被占用，把题库源文件复制进项目目录，写入初始
    /// 项目文件并登记到最近项目列表。
    pub fn create_project(&self, name: &str, source_files: &[PathBuf]) -> Result<Project> {
        let name = name.trim();
        validate_project_name(name)?;

        let project_dir = self.storage_root.join(name);
        if project_dir
            .join(format!("{}.{}", name, PROJECT_EXTENSION))
            .exists()
        {
            return Err(AppError::validation("该项目已存在"));
        }

        for source in source_files {
            if !source.exists() {
                return Err(AppError::validation(format!(
                    "题库文件不存在: {}",
                    source.display()
                )));
            }
            if !document_parser::is_supported_document(source) {
                return Err(AppError::validation(format!(
                    "不支持的题库文件格式: {}",
                    source.display()
                )));
            }
        }

        fs::create_dir_all(&project_dir)?;
        let mut copied = Vec::new();
        for source in source_files {
            let file_name = source.file_name().ok_or_else(|| {
                AppError::validation(format!("无效的题库文件路径: {}", source.display()))
            })?;
            let dest = project_dir.join(file_name);
            fs::copy(source, &dest)?;
            copied.push(dest.to_string_lossy().into_owned());
        }

        let mut project = Project::new(name, self.storage_root.to_string_lossy());
        if !copied.is_empty() {
            project.question_bank_path = Some(copied.join(";"));
        }
        project.last_accessed = Some(Utc::now());
        save_project(&project)?;

        if let Some(path) = project.project_file_path() {
            self.register_recent(name, &path)?;
        }
        info!("[ProjectManager] 项目已创建: {}", project_dir.display());
        Ok(project)
    }

    /// 最近项目列表，按访问时间从新到旧
    pub fn recent_projects(&self) -> Result<Vec<RecentProject>> {
        let path = self.recent_projects_path();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let json = fs::read_to_string(&path)?;
        let mut list: Vec<RecentProject> = match serde_json::from_str(&json) {
            Ok(list) => list,
            Err(e) => {
                warn!("[ProjectManager] 最近项目列表损坏，已重置: {}", e);
                Vec::new()
            }
        };
        list.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));
        Ok(list)
    }

    /// 记录一次项目访问：同路径条目刷新时间，否则追加；超出上限裁掉最旧的
    pub fn register_recent(&self, name: &str, path: &Path) -> Result<()> {
        let mut list = self.recent_projects()?;
        let path_text = path.to_string_lossy().into_owned();

        match list
            .iter_mut()
            .find(|p| p.project_path.eq_ignore_ascii_case(&path_text))
        {
            Some(existing) => existing.last_accessed = Utc::now(),
            None => list.push(RecentProject {
                project_name: Some(name.to_string()),
                project_path: path_text,
                last_accessed: Utc::now(),
            }),
        }

        if list.len() > RECENT_PROJECTS_CAP {
            list.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));
            list.truncate(RECENT_PROJECTS_CAP);
        }

        self.save_recent_projects(&list)
    }

    /// 清理已不存在的项目文件条目，返回移除数量
    pub fn prune_recent(&self) -> Result<usize> {
        let list = self.recent_projects()?;
        let before = list.len();
        let kept: Vec<RecentProject> = list
            .into_iter()
            .filter(|p| Path::new(&p.project_path).exists())
            .collect();

        let removed = before - kept.len();
        if removed > 0 {
            self.save_recent_projects(&kept)?;
            debug!("[ProjectManager] 已清理 {} 个失效的最近项目", removed);
        }
        Ok(removed)
    }

    /// 导入项目归档
    ///
    /// 安全解压到临时目录，读取清单并校验 SHA-256（旧版归档缺失校验和时
    /// 跳过），然后把项目安装到 `<storage>/imports/<名称>/` 下：文件名剥离
    /// 导出后缀，存储路径重写为安装位置，保证导入副本在原地即可继续保存。
    pub fn import_project(&self, archive_path: &Path) -> Result<PathBuf> {
        if !archive_path.exists() {
            return Err(AppError::not_found(format!(
                "归档文件不存在: {}",
                archive_path.display()
            )));
        }

        let temp_dir = tempfile::tempdir()?;
        extract_archive(archive_path, temp_dir.path())?;

        let manifest_path = temp_dir.path().join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Err(AppError::validation("归档缺少 manifest.json，无法导入"));
        }
        let manifest: Manifest = serde_json::from_str(&fs::read_to_string(&manifest_path)?)
            .map_err(|e| AppError::validation(format!("归档清单解析失败: {}", e)))?;
        let project_file = manifest
            .project_file
            .as_deref()
            .ok_or_else(|| AppError::validation("归档清单缺少项目文件名"))?;

        let extracted = temp_dir.path().join(project_file);
        if !extracted.exists() {
            return Err(AppError::validation(format!(
                "归档缺少清单声明的项目文件: {}",
                project_file
            )));
        }

        match manifest.checksum.as_deref() {
            Some(expected) => {
                let actual = calculate_file_hash(&extracted)?;
                if !actual.eq_ignore_ascii_case(expected) {
                    return Err(AppError::validation(format!(
                        "项目文件校验和不匹配，归档可能已损坏: 期望 {} 实际 {}",
                        expected, actual
                    )));
                }
            }
            None => debug!("[ProjectManager] 归档清单缺少校验和，跳过完整性验证"),
        }

        let stem = project_file
            .strip_suffix(&format!(".{}", PROJECT_EXTENSION))
            .unwrap_or(project_file);
        let clean_name = stem.strip_suffix(EXPORT_SUFFIX).unwrap_or(stem);
        if clean_name.is_empty() {
            return Err(AppError::validation(format!(
                "无法从清单推断项目名称: {}",
                project_file
            )));
        }

        let imports_root = self.storage_root.join(IMPORTS_DIR);
        let mut project: Project = serde_json::from_str(&fs::read_to_string(&extracted)?)
            .map_err(|e| AppError::validation(format!("项目文件解析失败: {}", e)))?;
        project.project_name = Some(clean_name.to_string());
        project.storage_path = Some(imports_root.to_string_lossy().into_owned());
        project.last_accessed = Some(Utc::now());
        save_project(&project)?;

        let installed = imports_root
            .join(clean_name)
            .join(format!("{}.{}", clean_name, PROJECT_EXTENSION));
        self.register_recent(clean_name, &installed)?;
        info!(
            "[ProjectManager] 项目 {} 已导入: {}",
            clean_name,
            installed.display()
        );
        Ok(installed)
    }

    fn save_recent_projects(&self, list: &[RecentProject]) -> Result<()> {
        fs::create_dir_all(&self.storage_root)?;
        let json = serde_json::to_string_pretty(list)?;
        fs::write(self.recent_projects_path(), json)?;
        Ok(())
    }

    fn recent_projects_path(&self) -> PathBuf {
        self.storage_root.join(RECENT_PROJECTS_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chapter, Question};

    fn sample_project(root: &Path, name: &str) -> Project {
        let mut project = Project::new(name, root.to_string_lossy());
        let mut chapter = Chapter::empty("第一章 绪论", 1);
        let mut answered = Question::new("操作系统的作用是什么", "管理硬件资源并为程序提供服务");
        answered.status = Some(true);
        answered.user_answer = Some("管理硬件".to_string());
        answered.ef_value = 2.1;
        let pending = Question::new("什么是进程", "运行中的程序实例");
        chapter.questions = Some(vec![answered, pending]);
        project.chapters = Some(vec![chapter]);
        project
    }

    fn build_archive(path: &Path, entries: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        for (name, content) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let project = sample_project(dir.path(), "操作系统");
        save_project(&project).unwrap();

        let path = project.project_file_path().unwrap();
        assert!(path.exists());

        let loaded = load_project(&path).unwrap();
        assert_eq!(loaded.project_name.as_deref(), Some("操作系统"));
        assert_eq!(loaded.total_questions(), 2);
        assert!(loaded.last_accessed.is_some());

        let first = &loaded.chapters.as_deref().unwrap()[0]
            .questions
            .as_deref()
            .unwrap()[0];
        assert_eq!(first.status, Some(true));
        assert!((first.ef_value - 2.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_load_project_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_project(&dir.path().join("nope.rhproj")).is_err());
    }

    #[test]
    fn test_create_project_validates_name() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ProjectManager::new(dir.path());

        assert!(manager.create_project("", &[]).is_err());
        assert!(manager.create_project("带/斜杠", &[]).is_err());

        manager.create_project("数据结构", &[]).unwrap();
        assert!(manager.create_project("数据结构", &[]).is_err());
    }

    #[test]
    fn test_create_project_copies_sources() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("讲义.txt");
        fs::write(&source, "第一章 概述").unwrap();

        let manager = ProjectManager::new(dir.path().join("storage"));
        let project = manager.create_project("计算机网络", &[source]).unwrap();

        let copied = dir
            .path()
            .join("storage")
            .join("计算机网络")
            .join("讲义.txt");
        assert!(copied.exists());
        assert!(project.question_bank_path.as_deref().unwrap().contains("讲义.txt"));
        assert!(project.project_file_path().unwrap().exists());

        // 创建即登记最近项目
        assert_eq!(manager.recent_projects().unwrap().len(), 1);
    }

    #[test]
    fn test_create_project_rejects_unknown_format() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("slides.key");
        fs::write(&source, "x").unwrap();

        let manager = ProjectManager::new(dir.path().join("storage"));
        assert!(manager.create_project("英语", &[source]).is_err());
    }

    #[test]
    fn test_recent_projects_cap_and_dedup() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ProjectManager::new(dir.path());

        for i in 0..12 {
            let path = dir.path().join(format!("p{}.rhproj", i));
            manager
                .register_recent(&format!("项目{}", i), &path)
                .unwrap();
        }
        assert_eq!(manager.recent_projects().unwrap().len(), RECENT_PROJECTS_CAP);

        // 同一路径（忽略大小写）只刷新时间，不新增条目
        let repeat = dir.path().join("P11.RHPROJ");
        manager.register_recent("项目11", &repeat).unwrap();
        assert_eq!(manager.recent_projects().unwrap().len(), RECENT_PROJECTS_CAP);
    }

    #[test]
    fn test_prune_recent_drops_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ProjectManager::new(dir.path());

        let alive = dir.path().join("存在.rhproj");
        fs::write(&alive, "{}").unwrap();
        manager.register_recent("存在", &alive).unwrap();
        manager
            .register_recent("消失", &dir.path().join("gone.rhproj"))
            .unwrap();

        assert_eq!(manager.prune_recent().unwrap(), 1);
        let remaining = manager.recent_projects().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].project_name.as_deref(), Some("存在"));
    }

    #[test]
    fn test_exam_settings_default_and_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let project = sample_project(dir.path(), "高等数学");

        let defaults = load_exam_settings(&project).unwrap();
        assert_eq!(defaults.course_number, "XF114514");
        assert_eq!(defaults.exam_time_minutes, 60);

        let mut settings = defaults;
        settings.exam_time_minutes = 90;
        settings.chapter_weights.insert("第一章 绪论".to_string(), 60.0);
        save_exam_settings(&project, &settings).unwrap();

        let loaded = load_exam_settings(&project).unwrap();
        assert_eq!(loaded.exam_time_minutes, 90);
        assert!((loaded.chapter_weights["第一章 绪论"] - 60.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_export_writes_manifest_and_reset_copy() {
        let dir = tempfile::tempdir().unwrap();
        let project = sample_project(dir.path(), "操作系统");
        save_project(&project).unwrap();

        let zip_path = export_project(&project).unwrap();
        assert_eq!(
            zip_path,
            project.project_dir().unwrap().join(EXPORT_ARCHIVE_NAME)
        );
        assert!(zip_path.exists());

        let mut archive = zip::ZipArchive::new(File::open(&zip_path).unwrap()).unwrap();

        let mut manifest_json = String::new();
        archive
            .by_name("manifest.json")
            .unwrap()
            .read_to_string(&mut manifest_json)
            .unwrap();
        let manifest: Manifest = serde_json::from_str(&manifest_json).unwrap();
        assert_eq!(manifest.project_file.as_deref(), Some("操作系统_exp.rhproj"));
        assert_eq!(manifest.version.as_deref(), Some("v2"));
        assert!(manifest.checksum.is_some());

        let mut copy_json = String::new();
        archive
            .by_name("操作系统_exp.rhproj")
            .unwrap()
            .read_to_string(&mut copy_json)
            .unwrap();
        let copy: Project = serde_json::from_str(&copy_json).unwrap();
        let question = &copy.chapters.as_deref().unwrap()[0]
            .questions
            .as_deref()
            .unwrap()[0];
        assert_eq!(question.status, None);
        assert_eq!(question.user_answer, None);
        // EF 值随导出保留
        assert!((question.ef_value - 2.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_import_round_trip_preserves_questions() {
        let dir = tempfile::tempdir().unwrap();
        let export_root = dir.path().join("export_side");
        let import_root = dir.path().join("import_side");

        let project = sample_project(&export_root, "操作系统");
        save_project(&project).unwrap();
        let archive = export_project(&project).unwrap();

        let manager = ProjectManager::new(&import_root);
        let installed = manager.import_project(&archive).unwrap();
        assert_eq!(
            installed,
            import_root
                .join("imports")
                .join("操作系统")
                .join("操作系统.rhproj")
        );
        assert!(installed.exists());

        let imported = load_project(&installed).unwrap();
        assert_eq!(imported.project_name.as_deref(), Some("操作系统"));
        assert_eq!(imported.total_questions(), 2);
        // 导入副本在安装位置即可继续保存
        assert_eq!(imported.project_file_path().unwrap(), installed);

        let recents = manager.recent_projects().unwrap();
        assert_eq!(recents.len(), 1);
        assert_eq!(recents[0].project_name.as_deref(), Some("操作系统"));
    }

    #[test]
    fn test_import_rejects_checksum_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let project_json =
            serde_json::to_string_pretty(&sample_project(dir.path(), "英语")).unwrap();
        let manifest = r#"{"ProjectFile":"英语_exp.rhproj","BankFile":null,"Version":"v2","Checksum":"deadbeef"}"#;

        let archive = dir.path().join("bad.zip");
        build_archive(
            &archive,
            &[("manifest.json", manifest), ("英语_exp.rhproj", &project_json)],
        );

        let manager = ProjectManager::new(dir.path().join("root"));
        let result = manager.import_project(&archive);
        assert!(result.unwrap_err().to_string().contains("校验和"));
    }

    #[test]
    fn test_import_requires_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("no_manifest.zip");
        build_archive(&archive, &[("随便.txt", "hello")]);

        let manager = ProjectManager::new(dir.path().join("root"));
        assert!(manager.import_project(&archive).is_err());
    }

    #[test]
    fn test_extract_archive_neutralizes_traversal_entries() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("evil.zip");
        build_archive(
            &archive,
            &[
                ("../escape.txt", "out"),
                ("/absolute.txt", "abs"),
                ("ok.txt", "in"),
            ],
        );

        let dest = dir.path().join("extracted");
        extract_archive(&archive, &dest).unwrap();

        assert!(dest.join("ok.txt").exists());
        // 上级目录引用被剥离，条目落在目标目录内
        assert!(dest.join("escape.txt").exists());
        assert!(!dir.path().join("escape.txt").exists());
        // 绝对路径条目整体跳过
        assert!(!dest.join("absolute.txt").exists());
    }
}
