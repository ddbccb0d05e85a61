//! CLI 命令处理模块

pub mod cases;
pub mod config;
pub mod output; // table/json/yaml 输出
pub mod progress;
pub mod report;
pub mod run;
