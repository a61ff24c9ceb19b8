// 该文件是 Jiannan （剑南东川） 项目的一部分。
// src/bin/simple_oneshot.rs - 单帧解码演示
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use url::Url;

use jiannan::{
  FromUrl,
  input::{ImageFileInput, TensorDump},
  labels,
  model::{YoloxDecoder, filter_detections},
  output::{DirectoryRecordOutput, Render, SaveImageFileOutput},
};

/// Jiannan 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输出张量转储 (tensor:///path/dump.bin?desc=/path/desc.json)
  #[arg(long, value_name = "TENSOR")]
  pub tensor: Url,
  /// 输入图像 (image:///path/frame.png)
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径 (image:///path/out.png 或 folder:///path/dir)
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
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
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let dump = TensorDump::from_url(&args.tensor)?;
  let decoder = YoloxDecoder::new(&dump.input_desc, &dump.output_desc)
    .context("检测头与模型输出不兼容，跳过该帧")?;

  if labels::COCO_CLASSES.len() != decoder.num_classes() {
    anyhow::bail!(
      "标签表长度 {} 与模型类别数 {} 不一致",
      labels::COCO_CLASSES.len(),
      decoder.num_classes()
    );
  }

  info!("开始解码...");
  let now = std::time::Instant::now();
  let candidates = decoder.decode(&dump.view()?).context("解码失败，跳过该帧")?;
  info!("解码得到 {} 个候选, 耗时: {:.2?}", candidates.len(), now.elapsed());

  let result = filter_detections(candidates, args.confidence, args.nms_threshold);
  info!("抑制后保留 {} 个检测", result.len());

  for (item, region) in result.items.iter().zip(result.regions()) {
    info!(
      "x={:.4}, y={:.4}, w={:.4}, h={:.4}, class=[{}, {}], score={:.4}",
      region.x,
      region.y,
      region.width,
      region.height,
      item.class_id,
      labels::class_name(item.class_id),
      item.score
    );
  }

  let mut frames = ImageFileInput::from_url(&args.input)?;
  let frame = frames.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;

  match args.output.scheme() {
    "folder" => {
      let output = DirectoryRecordOutput::from_url(&args.output)?;
      output.render_result(&frame, &result)?;
    }
    _ => {
      let output = SaveImageFileOutput::from_url(&args.output)?;
      output.render_result(&frame, &result)?;
    }
  }

  info!("渲染完成");

  Ok(())
}
