// 该文件是 Jiannan （剑南东川） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use thiserror::Error;

use crate::labels;
use crate::model::DetectResult;

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const CLASS_COLOR_COUNT: u32 = 80;

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("字体文件读取错误: {0}")]
  FontIoError(#[from] std::io::Error),
  #[error("字体文件无效")]
  InvalidFont,
}

/// HSV 转 RGB，用于为类别和轨迹生成稳定的颜色
pub(crate) fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

/// 按类别索引取稳定颜色
pub(crate) fn class_color(class_id: u32) -> Rgb<u8> {
  let hue = (class_id % CLASS_COLOR_COUNT) as f32 / CLASS_COLOR_COUNT as f32 * 360.0;
  hsv_to_rgb(hue, 0.8, 0.9)
}

/// 检测框与标签绘制
///
/// 字体在运行期从文件加载；没有字体时只画框不画标签。
pub struct Draw {
  font: Option<FontVec>,
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
    }
  }
}

impl Draw {
  pub fn with_font_file(mut self, path: &str) -> Result<Self, DrawError> {
    let font_data = std::fs::read(path)?;
    let font = FontVec::try_from_vec(font_data).map_err(|_| DrawError::InvalidFont)?;
    self.font = Some(font);
    Ok(self)
  }

  /// 在图像上绘制一帧的检测结果，bbox 为归一化坐标
  pub fn draw_detections_on_image(&self, image: &mut RgbImage, result: &DetectResult) {
    let (w, h) = (image.width() as f32, image.height() as f32);

    for item in result.items.iter() {
      let color = class_color(item.class_id);

      let x_min = ((item.bbox[0] * w).floor() as i32).clamp(0, w as i32 - 1);
      let y_min = ((item.bbox[1] * h).floor() as i32).clamp(0, h as i32 - 1);
      let x_max = ((item.bbox[2] * w).ceil() as i32).clamp(0, w as i32 - 1);
      let y_max = ((item.bbox[3] * h).ceil() as i32).clamp(0, h as i32 - 1);

      if x_min >= x_max || y_min >= y_max {
        continue;
      }

      let width = (x_max - x_min) as u32;
      let height = (y_max - y_min) as u32;
      let rect = Rect::at(x_min, y_min).of_size(width, height);
      draw_hollow_rect_mut(image, rect, color);

      // 第二圈边框增加可见度
      if width > 2 && height > 2 {
        let inner =
          Rect::at(x_min + 1, y_min + 1).of_size(width.saturating_sub(2), height.saturating_sub(2));
        draw_hollow_rect_mut(image, inner, color);
      }

      if let Some(font) = &self.font {
        let label = format!("{} {:.2}", labels::class_name(item.class_id), item.score);

        let text_width = (label.len() as f32 * self.label_char_width) as i32;
        let label_x = x_min.max(0);
        let label_y = (y_min - self.label_text_height).max(0);
        let max_width = (w as i32 - label_x).max(0);
        let label_width = text_width.min(max_width) as u32;
        let label_height = self.label_text_height as u32;

        if label_width > 0 && label_height > 0 {
          let rect = Rect::at(label_x, label_y).of_size(label_width, label_height);
          draw_filled_rect_mut(image, rect, color);

          draw_text_mut(
            image,
            Rgb([255u8, 255u8, 255u8]),
            label_x,
            label_y + self.label_text_vertical_padding,
            PxScale::from(self.font_size),
            font,
            &label,
          );
        }
      }
    }
  }
}

/// 纯文本与 JSON 的检测记录输出
pub struct Record {
  pub label_with_name: bool,
}

impl Record {
  pub fn record(&self, result: &DetectResult, path: &std::path::Path) -> Result<(), std::io::Error> {
    let mut records = Vec::new();
    for item in result.items.iter() {
      let name = if self.label_with_name {
        labels::class_name(item.class_id).to_string()
      } else {
        format!("{}", item.class_id)
      };
      let record = format!(
        "{}, {:.4}, {:.4}, {:.4}, {:.4}, {:.4}",
        name, item.score, item.bbox[0], item.bbox[1], item.bbox[2], item.bbox[3]
      );
      records.push(record);
    }
    std::fs::write(path.with_extension("txt"), records.join("\n"))?;

    let detections: Vec<serde_json::Value> = result
      .items
      .iter()
      .map(|item| {
        serde_json::json!({
          "class_id": item.class_id,
          "class_name": labels::class_name(item.class_id),
          "score": item.score,
          "bbox": item.bbox,
        })
      })
      .collect();
    let document = serde_json::json!({ "detections": detections });
    std::fs::write(path.with_extension("json"), document.to_string())?;

    Ok(())
  }
}
