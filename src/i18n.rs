use std::collections::HashMap;

pub struct I18n {
    translations: HashMap<String, HashMap<String, String>>,
    current_lang: String,
}

impl I18n {
    pub fn new(lang: &str) -> Self {
        let mut translations = HashMap::new();

        // 英文
        let mut en = HashMap::new();
        // Run output
        en.insert("run_completed".to_string(), "Command completed, exit code: {0}".to_string());
        en.insert("run_failed".to_string(), "Command failed ({0}), exit code: {1}".to_string());
        en.insert("run_cancelled".to_string(), "Command cancelled".to_string());
        en.insert("failure_spawn".to_string(), "could not start process".to_string());
        en.insert("failure_runtime".to_string(), "non-zero exit".to_string());
        en.insert("failure_elevation".to_string(), "privilege escalation denied".to_string());
        en.insert("elevated_marker".to_string(), "(ran elevated)".to_string());
        en.insert("execution_time".to_string(), "Execution time".to_string());
        en.insert("stdout".to_string(), "Standard output:".to_string());
        en.insert("stderr".to_string(), "Error output:".to_string());
        en.insert("result_saved".to_string(), "Result recorded".to_string());

        // Alias management
        en.insert("alias_set".to_string(), "Alias set: {0} = {1}".to_string());
        en.insert("alias_removed".to_string(), "Alias removed: {0}".to_string());
        en.insert("alias_missing".to_string(), "No such alias: {0}".to_string());
        en.insert("alias_none".to_string(), "No aliases defined".to_string());

        // Journal
        en.insert("log_empty".to_string(), "No recorded executions".to_string());
        en.insert("log_exported".to_string(), "Journal exported to {0}".to_string());
        en.insert("log_showing_last".to_string(), "(showing last {0} of {1} records)".to_string());
        en.insert("clean_title".to_string(), "About to remove {0} recorded executions".to_string());
        en.insert("confirm_delete_prompt".to_string(), "Confirm deletion? (yes): ".to_string());
        en.insert("clean_aborted".to_string(), "Aborted".to_string());
        en.insert("cleaned".to_string(), "Journal cleared".to_string());

        // 中文
        let mut zh = HashMap::new();
        // Run output
        zh.insert("run_completed".to_string(), "命令执行完成，退出码: {0}".to_string());
        zh.insert("run_failed".to_string(), "命令执行失败（{0}），退出码: {1}".to_string());
        zh.insert("run_cancelled".to_string(), "命令已取消".to_string());
        zh.insert("failure_spawn".to_string(), "无法启动进程".to_string());
        zh.insert("failure_runtime".to_string(), "退出码非零".to_string());
        zh.insert("failure_elevation".to_string(), "提权请求被拒绝".to_string());
        zh.insert("elevated_marker".to_string(), "（以提权方式运行）".to_string());
        zh.insert("execution_time".to_string(), "执行时间".to_string());
        zh.insert("stdout".to_string(), "标准输出:".to_string());
        zh.insert("stderr".to_string(), "错误输出:".to_string());
        zh.insert("result_saved".to_string(), "结果已记录".to_string());

        // Alias management
        zh.insert("alias_set".to_string(), "别名已设置: {0} = {1}".to_string());
        zh.insert("alias_removed".to_string(), "别名已删除: {0}".to_string());
        zh.insert("alias_missing".to_string(), "别名不存在: {0}".to_string());
        zh.insert("alias_none".to_string(), "尚未定义别名".to_string());

        // Journal
        zh.insert("log_empty".to_string(), "没有执行记录".to_string());
        zh.insert("log_exported".to_string(), "日志已导出到 {0}".to_string());
        zh.insert("log_showing_last".to_string(), "（显示最近 {0} 条，共 {1} 条）".to_string());
        zh.insert("clean_title".to_string(), "即将删除 {0} 条执行记录".to_string());
        zh.insert("confirm_delete_prompt".to_string(), "确认删除? (yes): ".to_string());
        zh.insert("clean_aborted".to_string(), "已取消".to_string());
        zh.insert("cleaned".to_string(), "日志已清空".to_string());

        translations.insert("en".to_string(), en);
        translations.insert("zh".to_string(), zh);

        // 确定语言 - 支持多种语言代码格式
        let effective_lang = if lang.starts_with("zh") || lang == "cn" || lang == "chinese" {
            "zh"
        } else if lang.starts_with("en") || lang == "english" {
            "en"
        } else {
            // 默认使用英文
            "en"
        };

        Self {
            translations,
            current_lang: effective_lang.to_string(),
        }
    }

    pub fn t(&self, key: &str) -> String {
        if let Some(lang_map) = self.translations.get(&self.current_lang) {
            if let Some(value) = lang_map.get(key) {
                return value.clone();
            }
        }
        key.to_string()
    }

    pub fn t_format(&self, key: &str, args: &[&str]) -> String {
        let template = self.t(key);
        let mut result = template;
        for (i, arg) in args.iter().enumerate() {
            result = result.replace(&format!("{{{}}}", i), arg);
        }
        result
    }
}
