use crate::constants::placeholders::{
    DAY, EXPORT_PATH, GUEST_FULL, GUEST_SHORT, HOST_FULL, HOST_SHORT, HOUR, LEGACY_ALIASES,
    MINUTE, MONTH, SECOND, YEAR,
};
use chrono::{Datelike, NaiveDateTime, Timelike};
use std::path::{Path, PathBuf};

/// 宿主机名称
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostNames {
    pub full: String,
    pub short: String,
}

impl HostNames {
    /// 优先使用配置中的名称，其次取环境变量，最后退回 localhost
    pub fn resolve(full: &str, short: &str) -> Self {
        let env_name = std::env::var("COMPUTERNAME")
            .or_else(|_| std::env::var("HOSTNAME"))
            .ok()
            .filter(|name| !name.trim().is_empty());

        let full = Some(full.trim())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .or(env_name)
            .unwrap_or_else(|| "localhost".to_string());

        let short = Some(short.trim())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| short_name(&full).to_string());

        Self {
            full,
            short: short.to_lowercase(),
        }
    }
}

/// 名称中第一个 '.' 之前的部分
pub fn short_name(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}

/// 替换路径模板中的占位符
pub fn render(template: &str, host: &HostNames, guest: &str, now: NaiveDateTime) -> String {
    let mut rendered = template.to_string();
    for (legacy, current) in LEGACY_ALIASES {
        rendered = rendered.replace(legacy, current);
    }

    rendered
        .replace(HOST_FULL, &host.full)
        .replace(HOST_SHORT, &host.short)
        .replace(GUEST_FULL, guest)
        .replace(GUEST_SHORT, short_name(guest))
        .replace(YEAR, &format!("{:04}", now.year()))
        .replace(MONTH, &format!("{:02}", now.month()))
        .replace(DAY, &format!("{:02}", now.day()))
        .replace(HOUR, &format!("{:02}", now.hour()))
        .replace(MINUTE, &format!("{:02}", now.minute()))
        .replace(SECOND, &format!("{:02}", now.second()))
}

/// 解析为路径，去掉末尾的分隔符
pub fn resolve_path(template: &str, host: &HostNames, guest: &str, now: NaiveDateTime) -> PathBuf {
    let rendered = render(template, host, guest, now);
    PathBuf::from(rendered.trim_end_matches(['/', '\\']))
}

/// 展开外部命令参数，额外支持 `{EXPORT_PATH}`
pub fn render_args(
    args: &[String],
    host: &HostNames,
    guest: &str,
    export_path: &Path,
    now: NaiveDateTime,
) -> Vec<String> {
    let export_path = export_path.to_string_lossy();
    args.iter()
        .map(|arg| render(&arg.replace(EXPORT_PATH, &export_path), host, guest, now))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn host() -> HostNames {
        HostNames {
            full: "HV01.corp.local".to_string(),
            short: "hv01".to_string(),
        }
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(7, 8, 9)
            .unwrap()
    }

    #[test]
    fn test_render_all_placeholders() {
        let rendered = render(
            "{HOST_FULL}/{HOST_SHORT}/{GUEST_FULL}/{GUEST_SHORT}/{YEAR}-{MONTH}-{DAY}_{HOUR}{MINUTE}{SECOND}",
            &host(),
            "db01.corp.local",
            now(),
        );
        assert_eq!(
            rendered,
            "HV01.corp.local/hv01/db01.corp.local/db01/2024-03-05_070809"
        );
    }

    #[test]
    fn test_legacy_aliases() {
        let rendered = render("{HV_HOST_SHORT}_{HV_GUEST_SHORT}", &host(), "web.x", now());
        assert_eq!(rendered, "hv01_web");
    }

    #[test]
    fn test_trailing_separators_trimmed() {
        let path = resolve_path("/backup/{GUEST_FULL}//", &host(), "vm1", now());
        assert_eq!(path, PathBuf::from("/backup/vm1"));
    }

    #[test]
    fn test_render_args_with_export_path() {
        let args = vec![
            "-Name".to_string(),
            "{GUEST_FULL}".to_string(),
            "-Path".to_string(),
            "{EXPORT_PATH}".to_string(),
        ];
        let rendered = render_args(&args, &host(), "vm1", Path::new("/exports/vm1"), now());
        assert_eq!(rendered, vec!["-Name", "vm1", "-Path", "/exports/vm1"]);
    }

    #[test]
    fn test_host_names_from_config() {
        let names = HostNames::resolve("HV02.Corp.Local", "");
        assert_eq!(names.full, "HV02.Corp.Local");
        assert_eq!(names.short, "hv02");
    }
}
