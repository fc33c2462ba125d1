use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 检测类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    /// 佩戴合规头盔（非违章）
    Compliant,
    NoHelmet,
    /// 简易"坚果壳"头盔
    NutshellHelmet,
}

impl ViolationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationType::Compliant => "compliant",
            ViolationType::NoHelmet => "no_helmet",
            ViolationType::NutshellHelmet => "nutshell_helmet",
        }
    }

    pub fn is_violation(&self) -> bool {
        !matches!(self, ViolationType::Compliant)
    }
}

impl fmt::Display for ViolationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViolationType {
    type Err = String;

    /// 兼容检测模型的类别名
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "compliant" | "with_helmet" | "helmet" => Ok(ViolationType::Compliant),
            "no_helmet" | "without_helmet" => Ok(ViolationType::NoHelmet),
            "nutshell_helmet" | "nutshell" => Ok(ViolationType::NutshellHelmet),
            other => Err(format!("unknown detection class: {}", other)),
        }
    }
}

/// 检测框（像素坐标，左上角 + 宽高）
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// 由中心点坐标构造
    pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        Self {
            x: cx - width / 2.0,
            y: cy - height / 2.0,
            width,
            height,
        }
    }

    /// 四周按比例外扩后裁剪到图像范围内，返回 (x, y, w, h)
    pub fn expand_clamped(&self, margin: f32, img_w: u32, img_h: u32) -> Option<(u32, u32, u32, u32)> {
        let dx = self.width * margin;
        let dy = self.height * margin;

        let x0 = (self.x - dx).max(0.0);
        let y0 = (self.y - dy).max(0.0);
        let x1 = (self.x + self.width + dx).min(img_w as f32);
        let y1 = (self.y + self.height + dy).min(img_h as f32);

        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        Some((
            x0 as u32,
            y0 as u32,
            (x1 - x0).round().max(1.0) as u32,
            (y1 - y0).round().max(1.0) as u32,
        ))
    }
}

/// 检测器对单帧的一条输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub violation_type: ViolationType,
    pub confidence: f32,
    pub region: BoundingBox,
    /// 检测器自带的跟踪 ID（若有）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<String>,
}

impl Detection {
    pub fn new(violation_type: ViolationType, confidence: f32, region: BoundingBox) -> Self {
        Self {
            violation_type,
            confidence,
            region,
            track_id: None,
        }
    }

    pub fn with_track_id(mut self, track_id: impl Into<String>) -> Self {
        self.track_id = Some(track_id.into());
        self
    }

    /// 取置信度最高的一条
    pub fn top(detections: &[Detection]) -> Option<&Detection> {
        detections
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    }
}

/// 车牌识别结果
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlateRead {
    pub text: Option<String>,
    pub confidence: f32,
}

impl PlateRead {
    pub fn new(text: Option<String>, confidence: f32) -> Self {
        Self { text, confidence }
    }

    pub fn unreadable() -> Self {
        Self::default()
    }

    /// 达到阈值且文本非空时返回车牌号
    pub fn readable_text(&self, min_confidence: f32) -> Option<&str> {
        match self.text.as_deref() {
            Some(text) if !text.is_empty() && self.confidence >= min_confidence => Some(text),
            _ => None,
        }
    }
}
