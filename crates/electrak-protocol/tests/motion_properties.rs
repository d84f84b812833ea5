//! 运动帧编码的属性测试

use electrak_protocol::{
    AccelerationOverflow, CURRENT_LIMIT, Direction, MAX_POSITION_MM, MAX_SPEED, MotionCommand,
};
use proptest::prelude::*;

fn any_direction() -> impl Strategy<Value = Direction> {
    prop_oneof![Just(Direction::Raise), Just(Direction::Lower)]
}

proptest! {
    /// Lower 时位置字段恒为 0，与输入无关
    #[test]
    fn lower_always_encodes_zero_position(
        position in any::<u32>(),
        speed in 0..=MAX_SPEED,
        accel in 0u32..=255,
    ) {
        let frame = MotionCommand::new(Direction::Lower, position, speed, accel)
            .encode(AccelerationOverflow::Reject)
            .unwrap();
        prop_assert_eq!(frame.position_raw(), 0);
        prop_assert_eq!(&frame.bytes()[0..2], &[0u8, 0u8]);
    }

    /// 相同输入产生相同帧，且各字段位于固定位置
    #[test]
    fn encoding_is_deterministic_with_fixed_layout(
        direction in any_direction(),
        position in 0..=MAX_POSITION_MM,
        speed in 0..=MAX_SPEED,
        accel in 0u32..=255,
        enable in any::<bool>(),
    ) {
        let mut cmd = MotionCommand::new(direction, position, speed, accel);
        cmd.enable = enable;

        let a = cmd.encode(AccelerationOverflow::Reject).unwrap();
        let b = cmd.encode(AccelerationOverflow::Reject).unwrap();
        prop_assert_eq!(a, b);

        let expected_position = match direction {
            Direction::Raise => (position * 10) as u16,
            Direction::Lower => 0,
        };
        let bytes = a.bytes();
        prop_assert_eq!(u16::from_le_bytes([bytes[0], bytes[1]]), expected_position);
        prop_assert_eq!(u16::from_le_bytes([bytes[2], bytes[3]]), CURRENT_LIMIT);
        prop_assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), speed);
        prop_assert_eq!(bytes[6] as u32, accel);
        prop_assert_eq!(bytes[7], enable as u8);
    }

    /// 超过 255 的加速度：Reject 报错，Clamp 为 255，Truncate 取低字节
    #[test]
    fn acceleration_overflow_policies(accel in 256u32..100_000) {
        let cmd = MotionCommand::new(Direction::Raise, 10, 100, accel);
        prop_assert!(cmd.encode(AccelerationOverflow::Reject).is_err());
        prop_assert_eq!(cmd.encode(AccelerationOverflow::Clamp).unwrap().acceleration(), 255);
        prop_assert_eq!(
            cmd.encode(AccelerationOverflow::Truncate).unwrap().acceleration(),
            (accel & 0xFF) as u8
        );
    }
}
