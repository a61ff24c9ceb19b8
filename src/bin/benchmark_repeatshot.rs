// 该文件是 Jiannan （剑南东川） 项目的一部分。
// src/bin/benchmark_repeatshot.rs - 重复解码基准测试
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use jiannan::{
  FromUrl,
  input::TensorDump,
  model::{YoloxDecoder, filter_detections},
};

/// Jiannan 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输出张量转储 (tensor:///path/dump.bin?desc=/path/desc.json)
  #[arg(long, value_name = "TENSOR")]
  pub tensor: Url,
  /// 重复次数
  #[arg(long, default_value = "1000", value_name = "COUNT")]
  pub times: usize,
  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.25", value_name = "THRESHOLD")]
  pub confidence: f32,
  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.45", value_name = "THRESHOLD")]
  pub nms_threshold: f32,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("张量转储: {}", args.tensor);

  let dump = TensorDump::from_url(&args.tensor)?;
  let decoder = YoloxDecoder::new(&dump.input_desc, &dump.output_desc)
    .context("检测头与模型输出不兼容")?;
  let view = dump.view()?;

  info!("开始基准测试, 重复 {} 次...", args.times);
  let mut times = Vec::with_capacity(args.times);
  for i in 0..args.times {
    let now = std::time::Instant::now();
    let candidates = decoder.decode(&view)?;
    let result = filter_detections(candidates, args.confidence, args.nms_threshold);
    let elapsed = now.elapsed();
    info!("({})解码完成, {} 个检测, 耗时: {:.2?}", i, result.len(), elapsed);
    times.push(elapsed);
  }

  if times.len() > 2 {
    warn!(
      "平均解码时间: {:.2?}",
      times.iter().skip(2).sum::<Duration>() / (times.len() - 2) as u32
    );
  }

  Ok(())
}
