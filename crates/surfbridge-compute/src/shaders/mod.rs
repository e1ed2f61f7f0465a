//! OpenCL C sources for the filter kernels.
//!
//! Images are the imported D3D11 planes: NV12 luma is a single-channel
//! `UNORM` image, NV12 chroma a two-channel one, RGBA a four-channel one.
//! `read_imagef` therefore returns normalized values and the float buffers
//! hold 0..255.
//!
//! Float buffers are planar: R, G, B planes of `channel_size = cols * rows`
//! floats each, row-major.

/// NV12 -> planar RGB float.
pub const NV12_TO_RGB: &str = "convertNV12ToRGBfloat";
/// Planar RGB float -> NV12.
pub const RGB_TO_NV12: &str = "convertRGBfloatToNV12";
/// Replicate-edge border padding of one plane.
pub const COPY_MAKE_BORDER: &str = "copyMakeBorder";
/// RGBA texture -> planar RGB float.
pub const RGBA_TO_RGB: &str = "convertRGBAToRGBfloat";

/// Default module with all four entry points.
pub const KERNEL_SOURCE: &str = r#"
__constant sampler_t smp = CLK_NORMALIZED_COORDS_FALSE |
                           CLK_ADDRESS_CLAMP_TO_EDGE |
                           CLK_FILTER_NEAREST;

// ============================================================================
// BT.601 limited range, 0..255
// ============================================================================
float3 yuv_to_rgb(float y, float u, float v)
{
    float c = (y - 16.0f) * 1.164f;
    float d = u - 128.0f;
    float e = v - 128.0f;
    float3 rgb = (float3)(c + 1.596f * e,
                          c - 0.391f * d - 0.813f * e,
                          c + 2.018f * d);
    return clamp(rgb, 0.0f, 255.0f);
}

float rgb_to_y(float3 p)
{
    return 0.257f * p.x + 0.504f * p.y + 0.098f * p.z + 16.0f;
}

// ============================================================================
// NV12 -> RGB float planes. One work item per 2x2 luma block.
// ============================================================================
__kernel void convertNV12ToRGBfloat(__read_only image2d_t y_plane,
                                    __read_only image2d_t uv_plane,
                                    __global float* rgb,
                                    int cols,
                                    int channel_size)
{
    int2 uv_pos = (int2)(get_global_id(0), get_global_id(1));
    float2 uv = read_imagef(uv_plane, smp, uv_pos).xy * 255.0f;

    for (int dy = 0; dy < 2; ++dy) {
        for (int dx = 0; dx < 2; ++dx) {
            int2 pos = uv_pos * 2 + (int2)(dx, dy);
            float y = read_imagef(y_plane, smp, pos).x * 255.0f;
            float3 p = yuv_to_rgb(y, uv.x, uv.y);
            int idx = pos.y * cols + pos.x;
            rgb[idx] = p.x;
            rgb[idx + channel_size] = p.y;
            rgb[idx + 2 * channel_size] = p.z;
        }
    }
}

// ============================================================================
// RGB float planes -> NV12. One work item per 2x2 luma block.
// ============================================================================
__kernel void convertRGBfloatToNV12(__write_only image2d_t y_plane,
                                    __write_only image2d_t uv_plane,
                                    __global const float* rgb,
                                    int cols,
                                    int channel_size)
{
    int2 uv_pos = (int2)(get_global_id(0), get_global_id(1));
    float3 sum = (float3)(0.0f);

    for (int dy = 0; dy < 2; ++dy) {
        for (int dx = 0; dx < 2; ++dx) {
            int2 pos = uv_pos * 2 + (int2)(dx, dy);
            int idx = pos.y * cols + pos.x;
            float3 p = (float3)(rgb[idx], rgb[idx + channel_size], rgb[idx + 2 * channel_size]);
            p = clamp(p, 0.0f, 255.0f);
            sum += p;
            write_imagef(y_plane, pos, (float4)(rgb_to_y(p) / 255.0f, 0.0f, 0.0f, 1.0f));
        }
    }

    float3 p = sum * 0.25f;
    float u = -0.148f * p.x - 0.291f * p.y + 0.439f * p.z + 128.0f;
    float v =  0.439f * p.x - 0.368f * p.y - 0.071f * p.z + 128.0f;
    write_imagef(uv_plane, uv_pos, (float4)(u / 255.0f, v / 255.0f, 0.0f, 1.0f));
}

// ============================================================================
// Border padding, replicate edges. One work item per source pixel; items on
// the source edge also fill the adjacent border strip (and corner).
// ============================================================================
__kernel void copyMakeBorder(__read_only image2d_t src,
                             __write_only image2d_t dst,
                             int rows,
                             int cols,
                             int border)
{
    int x = get_global_id(0);
    int y = get_global_id(1);
    float4 px = read_imagef(src, smp, (int2)(x, y));

    int x0 = (x == 0) ? -border : x;
    int x1 = (x == cols - 1) ? x + border : x;
    int y0 = (y == 0) ? -border : y;
    int y1 = (y == rows - 1) ? y + border : y;

    for (int oy = y0; oy <= y1; ++oy) {
        for (int ox = x0; ox <= x1; ++ox) {
            write_imagef(dst, (int2)(ox + border, oy + border), px);
        }
    }
}

// ============================================================================
// RGBA texture -> RGB float planes, scaled. One work item per 2x2 block.
// ============================================================================
__kernel void convertRGBAToRGBfloat(__read_only image2d_t src,
                                    __global float* rgb,
                                    int cols,
                                    int rows,
                                    float scale)
{
    int2 block = (int2)(get_global_id(0), get_global_id(1)) * 2;
    int channel_size = cols * rows;
    float k = 255.0f * scale;

    for (int dy = 0; dy < 2; ++dy) {
        for (int dx = 0; dx < 2; ++dx) {
            int2 pos = block + (int2)(dx, dy);
            float4 p = read_imagef(src, smp, pos) * k;
            int idx = pos.y * cols + pos.x;
            rgb[idx] = p.x;
            rgb[idx + channel_size] = p.y;
            rgb[idx + 2 * channel_size] = p.z;
        }
    }
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_points_present() {
        for name in [NV12_TO_RGB, RGB_TO_NV12, COPY_MAKE_BORDER, RGBA_TO_RGB] {
            assert!(
                KERNEL_SOURCE.contains(&format!("__kernel void {}(", name)),
                "missing {}",
                name
            );
        }
    }
}
