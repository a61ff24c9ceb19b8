// 该文件是 Jiannan （剑南东川） 项目的一部分。
// src/output/trajectory.rs - 轨迹环形缓冲与绘制
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::collections::{HashMap, VecDeque};

use image::RgbImage;
use imageproc::drawing::draw_line_segment_mut;

use crate::model::DetectRegion;
use crate::output::draw::hsv_to_rgb;

/// 每条轨迹保留的最大点数，超出时丢弃最旧的点
pub const TRAJECTORY_CAPACITY: usize = 50;

/// 外部跟踪器给出的带持久 ID 的检测区域
#[derive(Debug, Clone)]
pub struct TrackedRegion {
  pub track_id: u32,
  pub region: DetectRegion,
}

/// 按跟踪 ID 维护的有界轨迹缓冲
///
/// 解码核心不跨帧持有状态，轨迹属于跟踪器的消费侧。
pub struct TrajectoryLog {
  trails: HashMap<u32, VecDeque<(f32, f32)>>,
  capacity: usize,
}

impl Default for TrajectoryLog {
  fn default() -> Self {
    Self::with_capacity(TRAJECTORY_CAPACITY)
  }
}

impl TrajectoryLog {
  pub fn with_capacity(capacity: usize) -> Self {
    TrajectoryLog {
      trails: HashMap::new(),
      capacity: capacity.max(1),
    }
  }

  /// 追加一个区域的中心点到对应 ID 的轨迹
  pub fn push(&mut self, tracked: &TrackedRegion) {
    let center = (
      tracked.region.x + tracked.region.width / 2.0,
      tracked.region.y + tracked.region.height / 2.0,
    );
    let trail = self.trails.entry(tracked.track_id).or_default();
    trail.push_back(center);
    while trail.len() > self.capacity {
      trail.pop_front();
    }
  }

  pub fn trail(&self, track_id: u32) -> Option<&VecDeque<(f32, f32)>> {
    self.trails.get(&track_id)
  }

  pub fn clear(&mut self) {
    self.trails.clear();
  }

  /// 把所有轨迹画到图像上，点为归一化坐标
  pub fn draw_on_image(&self, image: &mut RgbImage) {
    let (w, h) = (image.width() as f32, image.height() as f32);

    for (&track_id, trail) in self.trails.iter() {
      if trail.len() < 2 {
        continue;
      }
      let color = track_color(track_id);
      let mut points = trail.iter();
      let mut previous = *points.next().unwrap();
      for &point in points {
        draw_line_segment_mut(
          image,
          (previous.0 * w, previous.1 * h),
          (point.0 * w, point.1 * h),
          color,
        );
        previous = point;
      }
    }
  }
}

/// 按跟踪 ID 生成稳定的轨迹颜色
pub fn track_color(track_id: u32) -> image::Rgb<u8> {
  let hue = (track_id.wrapping_mul(47) % 360) as f32;
  hsv_to_rgb(hue, 0.8, 0.9)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn tracked(track_id: u32, x: f32, y: f32) -> TrackedRegion {
    TrackedRegion {
      track_id,
      region: DetectRegion {
        category: 0,
        confidence: 0.9,
        x,
        y,
        width: 0.2,
        height: 0.2,
      },
    }
  }

  #[test]
  fn trail_records_centers_in_order() {
    let mut log = TrajectoryLog::default();
    log.push(&tracked(1, 0.0, 0.0));
    log.push(&tracked(1, 0.4, 0.4));

    let trail = log.trail(1).unwrap();
    assert_eq!(trail.len(), 2);
    assert_eq!(trail[0], (0.1, 0.1));
    assert_eq!(trail[1], (0.5, 0.5));
    assert!(log.trail(2).is_none());
  }

  #[test]
  fn trail_is_bounded_dropping_oldest() {
    let mut log = TrajectoryLog::with_capacity(3);
    for i in 0..5 {
      log.push(&tracked(7, i as f32 * 0.1, 0.0));
    }

    let trail = log.trail(7).unwrap();
    assert_eq!(trail.len(), 3);
    // 最旧的两个点被丢弃
    assert!((trail[0].0 - 0.3).abs() < 1e-6);
    assert!((trail[2].0 - 0.5).abs() < 1e-6);
  }

  #[test]
  fn track_colors_are_stable_and_distinct() {
    assert_eq!(track_color(5), track_color(5));
    assert_ne!(track_color(1), track_color(2));
  }
}
